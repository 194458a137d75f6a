//! Dual-model training - advances the hourly and the daily forecaster
//! per batch, each with its own Adam optimizer and loss accumulator
//!
//! `train(epochs)` alternates a full validation pass (reported first)
//! with one training epoch. A training epoch walks every batch; per
//! batch the hourly model steps once for each trailing day offset and
//! the daily model once for each trailing week offset. Recoverable
//! per-batch failures are logged and skipped before any parameter is
//! touched, so a malformed or short household history never aborts an
//! epoch. Everything else propagates and terminates the run.

use anyhow::{bail, Context, Result};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::ElementConversion;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::dataset::ConsumptionDataset;
use crate::loader::{BatchLoader, ConsumptionBatch};
use crate::model::{mean_squared_error, ConsumptionLstm, ConsumptionLstmConfig};
use crate::validate::validate_epoch;
use crate::window::{BatchError, BatchWindows, DAYS_PER_WEEK, HOURS_PER_DAY, LOOKBACK_MARGIN};

pub type InferBackend = NdArray<f32>;
pub type TrainBackend = Autodiff<InferBackend>;

type HourlyModel = ConsumptionLstm<TrainBackend>;
type DailyModel = ConsumptionLstm<TrainBackend>;

/// Configuration for the train subcommand
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub data_dir: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub lr_hourly: f64,
    pub lr_daily: f64,
    pub hidden_hourly: usize,
    pub hidden_daily: usize,
    pub dropout_hourly: f64,
    pub dropout_daily: f64,
    pub validation_split: f64,
    pub prefetch: usize,
}

/// Accumulated results of one training epoch
#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub hourly_loss: f64,
    pub daily_loss: f64,
    /// Batches seen, skipped ones included (they stay in the divisor)
    pub batches: usize,
    pub skipped: usize,
    pub hourly_steps: usize,
    pub daily_steps: usize,
}

/// Per-batch sums, committed to the epoch accumulators only on success
struct BatchOutcome {
    hourly_loss: f64,
    daily_loss: f64,
    hourly_steps: usize,
    daily_steps: usize,
    day_budget: usize,
}

/// Owns both models, both optimizers and the epoch accumulators.
///
/// Exactly one writer exists (this trainer); the validator only ever
/// sees `valid()` copies on the inner backend, so no locking is needed.
pub struct DualTrainer<OH, OD>
where
    OH: Optimizer<HourlyModel, TrainBackend>,
    OD: Optimizer<DailyModel, TrainBackend>,
{
    hourly: HourlyModel,
    daily: DailyModel,
    opt_hourly: OH,
    opt_daily: OD,
    lr_hourly: f64,
    lr_daily: f64,
    device: NdArrayDevice,
}

/// Build a trainer with freshly initialized models and optimizers.
pub fn new_trainer(
    config: &TrainConfig,
    device: NdArrayDevice,
) -> DualTrainer<
    impl Optimizer<HourlyModel, TrainBackend>,
    impl Optimizer<DailyModel, TrainBackend>,
> {
    let hourly = ConsumptionLstmConfig::new(crate::window::CHANNELS, config.hidden_hourly)
        .with_dropout_rate(config.dropout_hourly)
        .init::<TrainBackend>(&device);
    let daily = ConsumptionLstmConfig::new(crate::window::CHANNELS, config.hidden_daily)
        .with_dropout_rate(config.dropout_daily)
        .init::<TrainBackend>(&device);
    DualTrainer {
        hourly,
        daily,
        opt_hourly: AdamConfig::new().init(),
        opt_daily: AdamConfig::new().init(),
        lr_hourly: config.lr_hourly,
        lr_daily: config.lr_daily,
        device,
    }
}

impl<OH, OD> DualTrainer<OH, OD>
where
    OH: Optimizer<HourlyModel, TrainBackend>,
    OD: Optimizer<DailyModel, TrainBackend>,
{
    /// Evaluation-mode copies of both models: inner backend, no
    /// autodiff, dropout inert.
    pub fn eval_models(
        &self,
    ) -> (
        ConsumptionLstm<InferBackend>,
        ConsumptionLstm<InferBackend>,
    ) {
        (self.hourly.valid(), self.daily.valid())
    }

    /// Run `epochs` passes, each one a full validation pass followed by
    /// one training epoch, both drawn fresh from the loader factories.
    pub fn train<TF, TI, VF, VI>(&mut self, epochs: usize, mut train_batches: TF, mut val_batches: VF)
    where
        TF: FnMut() -> TI,
        TI: Iterator<Item = Result<ConsumptionBatch>>,
        VF: FnMut() -> VI,
        VI: Iterator<Item = Result<ConsumptionBatch>>,
    {
        for epoch in 0..epochs {
            let (hourly, daily) = self.eval_models();
            let report = validate_epoch(&hourly, &daily, val_batches(), &self.device);
            info!(
                epoch,
                epochs,
                val_loss = format!("{:.6}", report.loss),
                val_batches = report.batches,
                val_skipped = report.skipped,
                "validation pass"
            );

            let stats = self.train_one_epoch(train_batches());
            info!(
                epoch,
                epochs,
                hourly_loss = format!("{:.6}", stats.hourly_loss),
                daily_loss = format!("{:.6}", stats.daily_loss),
                batches = stats.batches,
                skipped = stats.skipped,
                "training epoch"
            );
        }
    }

    /// One full pass over the training batches.
    pub fn train_one_epoch(
        &mut self,
        batches: impl Iterator<Item = Result<ConsumptionBatch>>,
    ) -> EpochStats {
        let mut stats = EpochStats {
            hourly_loss: 0.0,
            daily_loss: 0.0,
            batches: 0,
            skipped: 0,
            hourly_steps: 0,
            daily_steps: 0,
        };
        let mut running_hourly = 0.0f64;
        let mut running_daily = 0.0f64;
        let mut last_day_budget = 0usize;

        for batch in batches {
            stats.batches += 1;
            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable batch");
                    stats.skipped += 1;
                    continue;
                }
            };
            match self.train_batch(&batch) {
                Ok(outcome) => {
                    running_hourly += outcome.hourly_loss;
                    running_daily += outcome.daily_loss;
                    stats.hourly_steps += outcome.hourly_steps;
                    stats.daily_steps += outcome.daily_steps;
                    // When the trailing batches of an epoch all get
                    // skipped, the divisor budget stays at the last
                    // successful batch's value.
                    last_day_budget = outcome.day_budget;
                }
                Err(err) => {
                    warn!(error = %err, "skipping batch");
                    stats.skipped += 1;
                }
            }
        }

        stats.hourly_loss = epoch_loss(running_hourly, last_day_budget as f64, stats.batches);
        // The weekly denominator stays fractional: day_budget / 7, not
        // the truncated week budget used as the loop bound.
        stats.daily_loss = epoch_loss(
            running_daily,
            last_day_budget as f64 / DAYS_PER_WEEK as f64,
            stats.batches,
        );
        stats
    }

    /// All fallible windowing happens before the first optimizer step,
    /// so a skipped batch never leaves a half-applied update behind.
    fn train_batch(&mut self, batch: &ConsumptionBatch) -> Result<BatchOutcome, BatchError> {
        let windows = BatchWindows::<TrainBackend>::from_batch(&batch.households, &self.device)?;
        let day_offsets = windows.train_day_offsets()?;
        let week_offsets = windows.train_week_offsets()?;

        let mut outcome = BatchOutcome {
            hourly_loss: 0.0,
            daily_loss: 0.0,
            hourly_steps: 0,
            daily_steps: 0,
            day_budget: windows.day_budget(),
        };

        for day in day_offsets {
            let (features, label) = windows.hourly_window(day);
            let forecast = self.hourly.forecast(features, HOURS_PER_DAY);
            let loss = mean_squared_error(forecast, label);
            outcome.hourly_loss += loss.clone().into_scalar().elem::<f64>();
            let grads = GradientsParams::from_grads(loss.backward(), &self.hourly);
            self.hourly = self
                .opt_hourly
                .step(self.lr_hourly, self.hourly.clone(), grads);
            outcome.hourly_steps += 1;
        }

        for week in week_offsets {
            let (features, label) = windows.daily_window(week);
            let forecast = self.daily.forecast(features, DAYS_PER_WEEK);
            let loss = mean_squared_error(forecast, label);
            outcome.daily_loss += loss.clone().into_scalar().elem::<f64>();
            let grads = GradientsParams::from_grads(loss.backward(), &self.daily);
            self.daily = self.opt_daily.step(self.lr_daily, self.daily.clone(), grads);
            outcome.daily_steps += 1;
        }

        Ok(outcome)
    }
}

/// Epoch-level normalization: accumulated loss divided by the LAST
/// batch's budget minus the lookback margin, then by the batch count.
/// The budget is a possibly fractional count (day_budget / 7 for the
/// weekly model); truncation only ever applies to loop bounds. The
/// last-batch denominator (rather than a per-batch average) is kept
/// deliberately for behavioral fidelity with the system this replaces;
/// see DESIGN.md before changing it.
fn epoch_loss(running: f64, last_budget: f64, batches: usize) -> f64 {
    if batches == 0 || last_budget <= LOOKBACK_MARGIN as f64 {
        return 0.0;
    }
    running / (last_budget - LOOKBACK_MARGIN as f64) / batches as f64
}

/// Main entry point for the train subcommand
pub fn run(config: TrainConfig) -> Result<()> {
    info!(
        data_dir = %config.data_dir.display(),
        epochs = config.epochs,
        batch_size = config.batch_size,
        lr_hourly = config.lr_hourly,
        lr_daily = config.lr_daily,
        validation_split = config.validation_split,
        "starting dual-resolution training"
    );

    let dataset = ConsumptionDataset::open(&config.data_dir)
        .context("failed to open the consumption dataset")?;
    if dataset.is_empty() {
        bail!(
            "no households with both consumption data and metadata under {}",
            config.data_dir.display()
        );
    }

    let (train_users, val_users) = dataset.split(config.validation_split);
    if train_users.is_empty() || val_users.is_empty() {
        bail!(
            "split of {} households left one side empty (validation_split = {})",
            dataset.len(),
            config.validation_split
        );
    }
    info!(
        households = dataset.len(),
        train = train_users.len(),
        validation = val_users.len(),
        "split households"
    );

    let dataset = Arc::new(dataset);
    let train_loader = BatchLoader::new(
        Arc::clone(&dataset),
        train_users,
        config.batch_size,
        config.prefetch,
    );
    let val_loader = BatchLoader::new(dataset, val_users, config.batch_size, config.prefetch);
    info!(
        train_batches = train_loader.batch_count(),
        val_batches = val_loader.batch_count(),
        prefetch = config.prefetch,
        "assembled batch loaders"
    );

    let device = NdArrayDevice::Cpu;
    let epochs = config.epochs;
    let mut trainer = new_trainer(&config, device);
    trainer.train(epochs, || train_loader.iter(), || val_loader.iter());

    info!("training complete");
    Ok(())
}
