//! wattcast - dual-resolution household electricity forecasting
//!
//! Trains two coupled LSTM forecasters over per-household consumption
//! histories: an hourly model predicting the next day hour by hour and a
//! daily model predicting the next week day by day. Validation blends
//! both into a single interval forecast with fixed weights.

mod dataset;
mod loader;
mod model;
mod train;
mod validate;
mod window;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "wattcast")]
#[command(about = "Dual-resolution LSTM forecasting of household electricity consumption", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding metadata.csv and per-household consumption files
    #[arg(short, long, global = true, env = "WATTCAST_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train both forecasters, reporting validation loss before every epoch
    Train {
        /// Number of training epochs
        #[arg(long, env = "WATTCAST_EPOCHS", default_value = "10")]
        epochs: usize,

        /// Households per batch
        #[arg(long, env = "WATTCAST_BATCH_SIZE", default_value = "32")]
        batch_size: usize,

        /// Learning rate for the hourly model
        #[arg(long, env = "WATTCAST_LR_HOURLY", default_value = "0.001")]
        lr_hourly: f64,

        /// Learning rate for the daily model
        #[arg(long, env = "WATTCAST_LR_DAILY", default_value = "0.001")]
        lr_daily: f64,

        /// Hidden size of the hourly LSTM
        #[arg(long, env = "WATTCAST_HIDDEN_HOURLY", default_value = "40")]
        hidden_hourly: usize,

        /// Hidden size of the daily LSTM
        #[arg(long, env = "WATTCAST_HIDDEN_DAILY", default_value = "20")]
        hidden_daily: usize,

        /// Dropout rate of the hourly LSTM
        #[arg(long, env = "WATTCAST_DROPOUT_HOURLY", default_value = "0.2")]
        dropout_hourly: f64,

        /// Dropout rate of the daily LSTM
        #[arg(long, env = "WATTCAST_DROPOUT_DAILY", default_value = "0.3")]
        dropout_daily: f64,

        /// Fraction of households held out for validation (0.0 - 1.0)
        #[arg(long, env = "WATTCAST_VALIDATION_SPLIT", default_value = "0.2")]
        validation_split: f64,

        /// Batches buffered ahead by the loader thread
        #[arg(long, env = "WATTCAST_PREFETCH", default_value = "2")]
        prefetch: usize,
    },

    /// Print dataset statistics without training anything
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            epochs,
            batch_size,
            lr_hourly,
            lr_daily,
            hidden_hourly,
            hidden_daily,
            dropout_hourly,
            dropout_daily,
            validation_split,
            prefetch,
        } => {
            train::run(train::TrainConfig {
                data_dir: cli.data_dir,
                epochs,
                batch_size,
                lr_hourly,
                lr_daily,
                hidden_hourly,
                hidden_daily,
                dropout_hourly,
                dropout_daily,
                validation_split,
                prefetch,
            })?;
        }
        Commands::Stats => {
            run_stats(&cli.data_dir)?;
        }
    }

    Ok(())
}

/// Walk every household once and print what the pipeline would see.
fn run_stats(data_dir: &std::path::Path) -> Result<()> {
    let dataset = dataset::ConsumptionDataset::open(data_dir)
        .context("failed to open the consumption dataset")?;

    println!("DATASET STATISTICS");
    println!("  Data dir:   {}", data_dir.display());
    println!("  Households: {}", dataset.len());
    println!("  Range:      {} .. {}", dataset::RANGE_START, dataset::RANGE_END);
    println!();
    println!("  Household             Hours     Days   Weeks");

    let mut total_hours = 0usize;
    for user in dataset.users() {
        match dataset.load(user) {
            Ok(history) => {
                let hours = history.len();
                total_hours += hours;
                println!(
                    "  {:<20} {:>6} {:>8} {:>7}",
                    user,
                    hours,
                    hours / window::HOURS_PER_DAY,
                    hours / window::HOURS_PER_DAY / window::DAYS_PER_WEEK,
                );
            }
            Err(err) => {
                println!("  {user:<20} unreadable: {err:#}");
            }
        }
    }

    println!();
    println!("  Total hours: {total_hours}");
    Ok(())
}
