//! Batch assembly with background prefetch
//!
//! Households are grouped into fixed-size batches. Within a batch every
//! history is trimmed to the shortest member, floored to a whole number
//! of days, so stacking into one tensor is well-defined.
//!
//! CSV reading and assembly run on a prefetch thread feeding a bounded
//! channel; the training loop only ever blocks on `recv`, overlapping
//! file I/O with the previous batch's compute. The thread stops on its
//! own once the iterator is dropped and the channel closes.

use anyhow::Result;
use std::sync::mpsc::{self, IntoIter, SyncSender};
use std::sync::Arc;
use std::thread;

use crate::dataset::{ConsumptionDataset, HouseholdHistory};
use crate::window::HOURS_PER_DAY;

/// One assembled batch of equal-length histories
#[derive(Debug, Clone)]
pub struct ConsumptionBatch {
    pub households: Vec<HouseholdHistory>,
}

/// Assembles batches for one subset of the dataset's households
pub struct BatchLoader {
    dataset: Arc<ConsumptionDataset>,
    users: Vec<String>,
    batch_size: usize,
    prefetch: usize,
}

impl BatchLoader {
    pub fn new(
        dataset: Arc<ConsumptionDataset>,
        users: Vec<String>,
        batch_size: usize,
        prefetch: usize,
    ) -> Self {
        Self {
            dataset,
            users,
            batch_size,
            prefetch: prefetch.max(1),
        }
    }

    /// Number of batches one pass yields, trailing partial batch included
    pub fn batch_count(&self) -> usize {
        self.users.len().div_ceil(self.batch_size)
    }

    /// Start one pass over the households on a fresh prefetch thread.
    pub fn iter(&self) -> IntoIter<Result<ConsumptionBatch>> {
        let (tx, rx) = mpsc::sync_channel(self.prefetch);
        let dataset = Arc::clone(&self.dataset);
        let users = self.users.clone();
        let batch_size = self.batch_size;
        thread::spawn(move || prefetch_worker(dataset, users, batch_size, tx));
        rx.into_iter()
    }
}

fn prefetch_worker(
    dataset: Arc<ConsumptionDataset>,
    users: Vec<String>,
    batch_size: usize,
    tx: SyncSender<Result<ConsumptionBatch>>,
) {
    for chunk in users.chunks(batch_size) {
        let batch = assemble(&dataset, chunk);
        if tx.send(batch).is_err() {
            // consumer hung up mid-pass
            return;
        }
    }
}

fn assemble(dataset: &ConsumptionDataset, users: &[String]) -> Result<ConsumptionBatch> {
    let mut households = Vec::with_capacity(users.len());
    for user in users {
        households.push(dataset.load(user)?);
    }
    trim_to_common_days(&mut households);
    Ok(ConsumptionBatch { households })
}

/// Trim every history to the shortest member, floored to whole days.
fn trim_to_common_days(households: &mut [HouseholdHistory]) {
    let min_len = households.iter().map(|h| h.len()).min().unwrap_or(0);
    let aligned = min_len - min_len % HOURS_PER_DAY;
    for household in households.iter_mut() {
        household.truncate(aligned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_of_hours(hours: usize) -> HouseholdHistory {
        HouseholdHistory {
            kwh: vec![1.0; hours],
            year: vec![2013.0; hours],
            month: vec![1.0; hours],
            day_in_week: vec![0.0; hours],
            hour: (0..hours).map(|t| (t % 24) as f32).collect(),
        }
    }

    #[test]
    fn trim_aligns_batch_to_whole_days() {
        let mut households = vec![
            history_of_hours(24 * 30),
            history_of_hours(24 * 28 + 5),
            history_of_hours(24 * 29),
        ];
        trim_to_common_days(&mut households);
        for household in &households {
            assert_eq!(household.len(), 24 * 28);
        }
    }

    #[test]
    fn trim_handles_equal_lengths_untouched() {
        let mut households = vec![history_of_hours(24 * 10), history_of_hours(24 * 10)];
        trim_to_common_days(&mut households);
        assert!(households.iter().all(|h| h.len() == 24 * 10));
    }

    fn fixture_dataset(dir: &std::path::Path, users: &[&str], hours: usize) -> ConsumptionDataset {
        use std::io::Write;
        let mut file = std::fs::File::create(dir.join("metadata.csv")).unwrap();
        writeln!(file, "user,province").unwrap();
        for user in users {
            writeln!(file, "{user},Porto").unwrap();
        }
        let consumption = dir.join("consumption");
        std::fs::create_dir_all(&consumption).unwrap();
        for user in users {
            let mut file = std::fs::File::create(consumption.join(format!("{user}.csv"))).unwrap();
            writeln!(file, "timestamp,kWh").unwrap();
            let mut ts = chrono::NaiveDate::from_ymd_opt(2013, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            for _ in 0..hours {
                writeln!(file, "{},1.0", ts.format("%Y-%m-%d %H:%M:%S")).unwrap();
                ts += chrono::Duration::hours(1);
            }
        }
        ConsumptionDataset::open(dir).unwrap()
    }

    #[test]
    fn iter_yields_assembled_batches_through_the_prefetch_channel() {
        let dir = tempfile::TempDir::new().unwrap();
        let dataset = Arc::new(fixture_dataset(dir.path(), &["u1", "u2"], 48));
        let users = dataset.users().to_vec();
        let loader = BatchLoader::new(dataset, users, 1, 2);
        assert_eq!(loader.batch_count(), 2);

        let batches: Vec<_> = loader.iter().collect();
        assert_eq!(batches.len(), 2);
        for batch in batches {
            let batch = batch.unwrap();
            assert_eq!(batch.households.len(), 1);
            assert_eq!(batch.households[0].len(), 48);
        }
    }

    #[test]
    fn missing_household_file_surfaces_as_an_err_item() {
        let dir = tempfile::TempDir::new().unwrap();
        let dataset = Arc::new(fixture_dataset(dir.path(), &["u1"], 24));
        let loader = BatchLoader::new(dataset, vec!["ghost".to_string()], 1, 1);
        let items: Vec<_> = loader.iter().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
