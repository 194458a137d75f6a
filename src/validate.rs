//! Ensemble validation - blends the daily week-ahead forecast with fresh
//! hourly forecasts and scores against held-out truth
//!
//! Per batch the daily model runs once over all days up to the last whole
//! week, yielding a 7-day forecast. Each scored day then gets a fresh
//! hourly forecast which is blended with the matching day-of-week scalar,
//! broadcast over 24 hours, at fixed 0.6/0.4 weights.
//!
//! Both models are expected in their evaluation form (`valid()`): no
//! autodiff, dropout disabled, no parameter mutation. A failing batch is
//! logged and skipped and contributes neither loss nor divisor - the
//! trainer counts skipped batches in its divisor, the validator does not.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use tracing::warn;

use crate::loader::ConsumptionBatch;
use crate::model::{mean_squared_error, ConsumptionLstm};
use crate::window::{BatchError, BatchWindows, DAYS_PER_WEEK, HOURS_PER_DAY};

/// Fixed ensemble weights
pub const W_HOURLY: f32 = 0.6;
pub const W_DAILY: f32 = 0.4;

/// Outcome of one validation pass
#[derive(Debug, Clone, Copy)]
pub struct ValidationReport {
    /// Accumulated loss divided by the number of scored batches
    pub loss: f64,
    /// Batches seen, skipped ones included
    pub batches: usize,
    /// Batches that contributed to the loss
    pub scored: usize,
    pub skipped: usize,
}

/// Blend a `[batch, steps]` hourly forecast with a per-household daily
/// scalar broadcast across all steps.
pub fn blend_forecasts<B: Backend>(
    hourly: Tensor<B, 2>,
    daily_scalar: Tensor<B, 1>,
) -> Tensor<B, 2> {
    let [_, steps] = hourly.dims();
    let daily = daily_scalar.unsqueeze_dim::<2>(1).repeat_dim(1, steps);
    hourly * W_HOURLY + daily * W_DAILY
}

/// One full pass over the held-out batches, returning the mean loss.
pub fn validate_epoch<B, I>(
    hourly_model: &ConsumptionLstm<B>,
    daily_model: &ConsumptionLstm<B>,
    batches: I,
    device: &B::Device,
) -> ValidationReport
where
    B: Backend,
    I: Iterator<Item = anyhow::Result<ConsumptionBatch>>,
{
    let mut running_loss = 0.0f64;
    let mut seen = 0usize;
    let mut scored = 0usize;
    let mut skipped = 0usize;

    for batch in batches {
        seen += 1;
        let batch = match batch {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "skipping unreadable validation batch");
                skipped += 1;
                continue;
            }
        };
        match validate_batch(hourly_model, daily_model, &batch, device) {
            Ok(batch_loss) => {
                running_loss += batch_loss;
                scored += 1;
            }
            Err(err) => {
                warn!(error = %err, "skipping validation batch");
                skipped += 1;
            }
        }
    }

    let loss = if scored > 0 {
        running_loss / scored as f64
    } else {
        0.0
    };
    ValidationReport {
        loss,
        batches: seen,
        scored,
        skipped,
    }
}

/// Accumulated blended loss over the scored day offsets of one batch.
/// Not divided by the offset count; the caller divides by batches only.
fn validate_batch<B: Backend>(
    hourly_model: &ConsumptionLstm<B>,
    daily_model: &ConsumptionLstm<B>,
    batch: &ConsumptionBatch,
    device: &B::Device,
) -> Result<f64, BatchError> {
    let windows = BatchWindows::<B>::from_batch(&batch.households, device)?;
    let batch_size = windows.batch_size();

    let week_forecast = daily_model.forecast(windows.weekly_context()?, DAYS_PER_WEEK);

    let mut batch_loss = 0.0f64;
    for day in windows.val_day_offsets()? {
        let (features, label) = windows.hourly_window(day);
        let hourly_forecast = hourly_model.forecast(features, HOURS_PER_DAY);

        let position = windows.day_position_in_forecast_week(day)?;
        let day_scalar: Tensor<B, 1> = week_forecast
            .clone()
            .slice([0..batch_size, position..position + 1])
            .squeeze(1);

        let blended = blend_forecasts(hourly_forecast, day_scalar);
        let loss: f64 = mean_squared_error(blended, label).into_scalar().elem();
        batch_loss += loss;
    }
    Ok(batch_loss)
}
