//! Windowing engine - sliding hourly and weekly windows over one batch
//!
//! One batch of equal-length household histories is stacked into a
//! `[batch, 5, hours]` feature tensor (channel 0 is kWh, then year,
//! month, day-of-week, hour). A `[batch, 5, days]` companion tensor is
//! derived by averaging each channel over consecutive 24-hour blocks.
//! Both tensors are batch-scoped and discarded once the batch's windows
//! have been consumed.
//!
//! Offsets index days (hourly windows) or weeks (daily windows) and are
//! only generated within the trailing portion of each history; the range
//! helpers below encode that policy. Slicing outside the configured
//! ranges is a contract violation and panics in the tensor layer.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use thiserror::Error;

use crate::dataset::HouseholdHistory;

pub const HOURS_PER_DAY: usize = 24;
pub const DAYS_PER_WEEK: usize = 7;
/// Number of feature channels (kWh, year, month, day-of-week, hour)
pub const CHANNELS: usize = 5;

/// Offsets trained per batch at each resolution. A hand-tuned trailing
/// window policy: only the most recent horizon of each history is
/// trained on, keeping the window count per epoch bounded.
pub const TRAIN_HORIZON: usize = 7;
/// Days scored per validation batch
pub const VAL_HORIZON_DAYS: usize = 4;
/// Offsets held back from the very end of each history
pub const LOOKBACK_MARGIN: usize = 3;
/// A window at offset `n` sees periods `[0, n + FEATURE_LEAD)` and
/// predicts the period right after them.
pub const FEATURE_LEAD: usize = 2;

/// Recoverable per-batch failures. Anything else raised while windowing
/// (out-of-range slice, non-day-aligned length) is a programming error
/// and is allowed to panic.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("household {index} has {actual} readings, batch expects {expected}")]
    RaggedHistory {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("history of {got} {unit}s is too short for the trailing window (needs {need})")]
    HistoryTooShort {
        got: usize,
        need: usize,
        unit: &'static str,
    },
    #[error("day offset {day} falls outside the week-ahead forecast")]
    OffsetOutsideWeek { day: usize },
    #[error("batch is empty")]
    EmptyBatch,
}

/// Sliding-window view over one stacked batch
#[derive(Debug)]
pub struct BatchWindows<B: Backend> {
    hourly: Tensor<B, 3>,
    daily: Tensor<B, 3>,
    batch: usize,
    day_budget: usize,
    week_budget: usize,
}

impl<B: Backend> BatchWindows<B> {
    /// Stack a batch of histories and derive the day-aggregated tensor.
    ///
    /// All histories must share one length, and that length must be a
    /// whole number of days (the batch assembler guarantees both; a
    /// ragged batch is reported, a misaligned one is a caller error).
    pub fn from_batch(households: &[HouseholdHistory], device: &B::Device) -> Result<Self, BatchError> {
        let batch = households.len();
        let hours = households.first().ok_or(BatchError::EmptyBatch)?.len();
        for (index, household) in households.iter().enumerate() {
            if household.len() != hours {
                return Err(BatchError::RaggedHistory {
                    index,
                    expected: hours,
                    actual: household.len(),
                });
            }
        }

        let mut stacked = Vec::with_capacity(batch * CHANNELS * hours);
        for household in households {
            stacked.extend_from_slice(&household.kwh);
            stacked.extend_from_slice(&household.year);
            stacked.extend_from_slice(&household.month);
            stacked.extend_from_slice(&household.day_in_week);
            stacked.extend_from_slice(&household.hour);
        }
        let hourly = Tensor::<B, 3>::from_data(
            TensorData::new(stacked, [batch, CHANNELS, hours]),
            device,
        );

        let day_budget = hours / HOURS_PER_DAY;
        let week_budget = day_budget / DAYS_PER_WEEK;
        let daily = hourly
            .clone()
            .reshape([batch, CHANNELS, day_budget, HOURS_PER_DAY])
            .mean_dim(3)
            .squeeze(3);

        Ok(Self {
            hourly,
            daily,
            batch,
            day_budget,
            week_budget,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    /// Whole days available in this batch (`hours / 24`)
    pub fn day_budget(&self) -> usize {
        self.day_budget
    }

    /// Whole weeks available in this batch; the trailing partial week is
    /// silently dropped from window generation.
    pub fn week_budget(&self) -> usize {
        self.week_budget
    }

    /// Hourly window at day offset `day`: all hours up to
    /// `(day + 2) * 24` as features, the next 24 hours of kWh as label.
    pub fn hourly_window(&self, day: usize) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let split = (day + FEATURE_LEAD) * HOURS_PER_DAY;
        let features = self
            .hourly
            .clone()
            .slice([0..self.batch, 0..CHANNELS, 0..split]);
        let label = self
            .hourly
            .clone()
            .slice([0..self.batch, 0..1, split..split + HOURS_PER_DAY])
            .squeeze(1);
        (features, label)
    }

    /// Daily window at week offset `week`: all days up to
    /// `(week + 2) * 7` as features, the next 7 days of kWh as label.
    pub fn daily_window(&self, week: usize) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let split = (week + FEATURE_LEAD) * DAYS_PER_WEEK;
        let features = self
            .daily
            .clone()
            .slice([0..self.batch, 0..CHANNELS, 0..split]);
        let label = self
            .daily
            .clone()
            .slice([0..self.batch, 0..1, split..split + DAYS_PER_WEEK])
            .squeeze(1);
        (features, label)
    }

    /// Feature context for the validation week-ahead forecast: all days
    /// up to the start of the last whole week.
    pub fn weekly_context(&self) -> Result<Tensor<B, 3>, BatchError> {
        if self.week_budget < FEATURE_LEAD {
            return Err(BatchError::HistoryTooShort {
                got: self.week_budget,
                need: FEATURE_LEAD,
                unit: "week",
            });
        }
        let split = (self.week_budget - 1) * DAYS_PER_WEEK;
        Ok(self
            .daily
            .clone()
            .slice([0..self.batch, 0..CHANNELS, 0..split]))
    }

    /// Day offsets trained per batch: `[day_budget - 10, day_budget - 3)`
    pub fn train_day_offsets(&self) -> Result<std::ops::Range<usize>, BatchError> {
        trailing_range(self.day_budget, TRAIN_HORIZON, "day")
    }

    /// Week offsets trained per batch: `[week_budget - 10, week_budget - 3)`
    pub fn train_week_offsets(&self) -> Result<std::ops::Range<usize>, BatchError> {
        trailing_range(self.week_budget, TRAIN_HORIZON, "week")
    }

    /// Day offsets scored during validation: `[day_budget - 7, day_budget - 3)`
    pub fn val_day_offsets(&self) -> Result<std::ops::Range<usize>, BatchError> {
        trailing_range(self.day_budget, VAL_HORIZON_DAYS, "day")
    }

    /// Position of day offset `day` within the validation week-ahead
    /// forecast, i.e. `day - (week_budget - 1) * 7`.
    pub fn day_position_in_forecast_week(&self, day: usize) -> Result<usize, BatchError> {
        let week_start = (self.week_budget - 1) * DAYS_PER_WEEK;
        let position = day
            .checked_sub(week_start)
            .ok_or(BatchError::OffsetOutsideWeek { day })?;
        if position >= DAYS_PER_WEEK {
            return Err(BatchError::OffsetOutsideWeek { day });
        }
        Ok(position)
    }
}

fn trailing_range(
    budget: usize,
    horizon: usize,
    unit: &'static str,
) -> Result<std::ops::Range<usize>, BatchError> {
    let reach = horizon + LOOKBACK_MARGIN;
    if budget < reach {
        return Err(BatchError::HistoryTooShort {
            got: budget,
            need: reach,
            unit,
        });
    }
    Ok(budget - reach..budget - LOOKBACK_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    /// Synthetic history of `days` whole days with kWh given per hour index
    fn history(days: usize, kwh: impl Fn(usize) -> f32) -> HouseholdHistory {
        let hours = days * HOURS_PER_DAY;
        HouseholdHistory {
            kwh: (0..hours).map(kwh).collect(),
            year: vec![2013.0; hours],
            month: (0..hours).map(|t| (t / 720 % 12 + 1) as f32).collect(),
            day_in_week: (0..hours).map(|t| (t / 24 % 7) as f32).collect(),
            hour: (0..hours).map(|t| (t % 24) as f32).collect(),
        }
    }

    fn windows(days: usize) -> BatchWindows<B> {
        let device = NdArrayDevice::Cpu;
        let batch = vec![history(days, |t| t as f32), history(days, |t| t as f32 * 0.5)];
        BatchWindows::from_batch(&batch, &device).unwrap()
    }

    #[test]
    fn budgets_truncate_partial_weeks() {
        let w = windows(80);
        assert_eq!(w.day_budget(), 80);
        // 80 / 7 = 11.43, last partial week dropped
        assert_eq!(w.week_budget(), 11);
    }

    #[test]
    fn training_generates_seven_offsets_at_each_resolution() {
        let w = windows(80);
        let days: Vec<usize> = w.train_day_offsets().unwrap().collect();
        let weeks: Vec<usize> = w.train_week_offsets().unwrap().collect();
        assert_eq!(days, (70..77).collect::<Vec<_>>());
        assert_eq!(days.len(), TRAIN_HORIZON);
        assert_eq!(weeks, (1..8).collect::<Vec<_>>());
        assert_eq!(weeks.len(), TRAIN_HORIZON);
    }

    #[test]
    fn validation_generates_four_trailing_day_offsets() {
        let w = windows(80);
        let days: Vec<usize> = w.val_day_offsets().unwrap().collect();
        assert_eq!(days, (73..77).collect::<Vec<_>>());
    }

    #[test]
    fn hourly_window_slices_features_and_next_day_label() {
        let w = windows(80);
        let day = 70;
        let (features, label) = w.hourly_window(day);
        assert_eq!(features.dims(), [2, CHANNELS, (day + 2) * 24]);
        assert_eq!(label.dims(), [2, 24]);

        // First household's kWh channel is the hour index itself
        let label = label.into_data();
        let label = label.as_slice::<f32>().unwrap();
        let expected: Vec<f32> = ((day + 2) * 24..(day + 3) * 24).map(|t| t as f32).collect();
        assert_eq!(&label[..24], expected.as_slice());
    }

    #[test]
    fn daily_window_slices_features_and_next_week_label() {
        let w = windows(80);
        let week = 1;
        let (features, label) = w.daily_window(week);
        assert_eq!(features.dims(), [2, CHANNELS, (week + 2) * 7]);
        assert_eq!(label.dims(), [2, 7]);
    }

    #[test]
    fn day_aggregation_matches_manual_24h_means() {
        let w = windows(21);
        let (_, label) = w.daily_window(0);
        let got = label.into_data();
        let got = got.as_slice::<f32>().unwrap().to_vec();

        // kWh of household 0 is t itself, so day d averages to 24d + 11.5
        for (i, day) in (14..21).enumerate() {
            let manual: f32 = ((day * 24)..(day + 1) * 24).map(|t| t as f32).sum::<f32>() / 24.0;
            assert!((got[i] - manual).abs() < 1e-3, "day {day}: {} vs {manual}", got[i]);
        }
    }

    #[test]
    fn ragged_batch_is_reported() {
        let device = NdArrayDevice::Cpu;
        let mut short = history(80, |_| 1.0);
        short.truncate(79 * HOURS_PER_DAY);
        let batch = vec![history(80, |_| 1.0), short];
        let err = BatchWindows::<B>::from_batch(&batch, &device).unwrap_err();
        assert!(matches!(err, BatchError::RaggedHistory { index: 1, .. }));
    }

    #[test]
    fn short_history_cannot_produce_training_offsets() {
        let w = windows(9);
        assert!(matches!(
            w.train_day_offsets().unwrap_err(),
            BatchError::HistoryTooShort { unit: "day", .. }
        ));
        assert!(matches!(
            w.train_week_offsets().unwrap_err(),
            BatchError::HistoryTooShort { unit: "week", .. }
        ));
    }

    #[test]
    fn forecast_week_position_is_bounded() {
        let w = windows(80);
        // week_budget = 11, forecast week covers days 70..77
        assert_eq!(w.day_position_in_forecast_week(70).unwrap(), 0);
        assert_eq!(w.day_position_in_forecast_week(76).unwrap(), 6);
        assert!(w.day_position_in_forecast_week(77).is_err());
        assert!(w.day_position_in_forecast_week(69).is_err());
    }
}
