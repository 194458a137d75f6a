//! Household consumption dataset - per-user CSV readers and metadata lookup
//!
//! Layout on disk:
//! - `<data_dir>/metadata.csv` with `user,province` columns
//! - `<data_dir>/consumption/<user>.csv` with `timestamp,kWh` columns,
//!   one row per hour, chronologically sorted
//!
//! A household participates only when both its consumption file and a
//! metadata row with a non-empty province exist. Every history is clipped
//! to the canonical time bounds shared by the whole dataset so that
//! batches of different households stack into equal-length tensors.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Largest lower bound over all household files; readings before this are dropped.
pub const RANGE_START: &str = "2012-10-01 00:00:00";
/// Smallest upper bound over all household files; readings after this are dropped.
pub const RANGE_END: &str = "2014-09-30 23:00:00";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CONSUMPTION_DIR: &str = "consumption";
const METADATA_FILE: &str = "metadata.csv";

/// One household's observed history, expanded into the five feature channels.
/// All vectors have identical length.
#[derive(Debug, Clone, Default)]
pub struct HouseholdHistory {
    pub kwh: Vec<f32>,
    pub year: Vec<f32>,
    pub month: Vec<f32>,
    pub day_in_week: Vec<f32>,
    pub hour: Vec<f32>,
}

impl HouseholdHistory {
    pub fn len(&self) -> usize {
        self.kwh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kwh.is_empty()
    }

    fn push(&mut self, timestamp: NaiveDateTime, kwh: f32) {
        self.kwh.push(kwh);
        self.year.push(timestamp.year() as f32);
        self.month.push(timestamp.month() as f32);
        // Monday = 0, matching the upstream metering export
        self.day_in_week.push(timestamp.weekday().num_days_from_monday() as f32);
        self.hour.push(timestamp.hour() as f32);
    }

    /// Drop everything after the first `len` readings.
    pub fn truncate(&mut self, len: usize) {
        self.kwh.truncate(len);
        self.year.truncate(len);
        self.month.truncate(len);
        self.day_in_week.truncate(len);
        self.hour.truncate(len);
    }
}

#[derive(Debug, Deserialize)]
struct MeterReading {
    timestamp: String,
    #[serde(rename = "kWh")]
    kwh: f32,
}

#[derive(Debug, Deserialize)]
struct MetadataRow {
    user: String,
    province: Option<String>,
}

/// Index over the households that have both data and metadata
#[derive(Debug, Clone)]
pub struct ConsumptionDataset {
    data_dir: PathBuf,
    users: Vec<String>,
    range_start: NaiveDateTime,
    range_end: NaiveDateTime,
}

impl ConsumptionDataset {
    /// Scan `data_dir` and build the sorted user index.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let metadata_path = data_dir.join(METADATA_FILE);
        let mut reader = csv::Reader::from_path(&metadata_path)
            .with_context(|| format!("failed to open {}", metadata_path.display()))?;

        let mut users_with_metadata = BTreeSet::new();
        for row in reader.deserialize() {
            let row: MetadataRow = row.context("malformed metadata row")?;
            if row.province.as_deref().is_some_and(|p| !p.is_empty()) {
                users_with_metadata.insert(row.user);
            }
        }

        let consumption_dir = data_dir.join(CONSUMPTION_DIR);
        let mut users_with_data = BTreeSet::new();
        let entries = fs::read_dir(&consumption_dir)
            .with_context(|| format!("failed to list {}", consumption_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    users_with_data.insert(stem.to_string());
                }
            }
        }

        // Sorted intersection keeps batch order and the train/val split deterministic
        let users: Vec<String> = users_with_metadata
            .intersection(&users_with_data)
            .cloned()
            .collect();

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            users,
            range_start: parse_timestamp(RANGE_START)?,
            range_end: parse_timestamp(RANGE_END)?,
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    /// Load one household's history, clipped to the canonical bounds.
    pub fn load(&self, user: &str) -> Result<HouseholdHistory> {
        let path = self
            .data_dir
            .join(CONSUMPTION_DIR)
            .join(format!("{user}.csv"));
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut history = HouseholdHistory::default();
        for row in reader.deserialize() {
            let row: MeterReading = row.with_context(|| format!("malformed reading for {user}"))?;
            let timestamp = parse_timestamp(&row.timestamp)
                .with_context(|| format!("bad timestamp for {user}"))?;
            if timestamp < self.range_start || timestamp > self.range_end {
                continue;
            }
            history.push(timestamp, row.kwh);
        }
        Ok(history)
    }

    /// Deterministic household-level split: the leading share of the
    /// sorted user list trains, the trailing `validation_split` validates.
    pub fn split(&self, validation_split: f64) -> (Vec<String>, Vec<String>) {
        let train_len = ((1.0 - validation_split) * self.users.len() as f64) as usize;
        let (train, val) = self.users.split_at(train_len.min(self.users.len()));
        (train.to_vec(), val.to_vec())
    }
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .with_context(|| format!("timestamp {raw:?} does not match {TIMESTAMP_FORMAT:?}"))
}
