//! Read path: outlier-filtered averages over the current period.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;
use tracing::{debug, error};

use crate::period::period_start;
use crate::storage::NetworkStatsStorage;
use crate::types::{HashrateSource, Hashrates, StatsRecord};
use crate::validation::{is_valid_hashrate, DEFAULT_DEVIATION_THRESHOLD};

/// Records compared against each other by the sliding-window filter.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSettings {
    pub window_size: usize,
    pub deviation_threshold: f64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            deviation_threshold: DEFAULT_DEVIATION_THRESHOLD,
        }
    }
}

/// Per-source averages over the admitted records of one period.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodAverages {
    pub averages: Hashrates,
    pub record_count: usize,
    pub period_start: DateTime<Utc>,
}

impl Serialize for PeriodAverages {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(HashrateSource::ALL.len() + 2))?;
        for (source, average) in self.averages.iter() {
            map.serialize_entry(&format!("average_{}_hashrate", source), &average)?;
        }
        map.serialize_entry("record_count", &self.record_count)?;
        map.serialize_entry("period_start", &self.period_start)?;
        map.end()
    }
}

#[derive(Clone)]
pub struct AverageAggregator {
    storage: Arc<dyn NetworkStatsStorage>,
    settings: AggregatorSettings,
}

impl AverageAggregator {
    pub fn new(storage: Arc<dyn NetworkStatsStorage>, settings: AggregatorSettings) -> Self {
        Self { storage, settings }
    }

    /// Averages for the period containing `now`, or `None` when the period has
    /// no admissible records or the store cannot be read.
    pub async fn current_period_averages(&self, now: DateTime<Utc>) -> Option<PeriodAverages> {
        let start = period_start(now);

        let records = match self.storage.records_since(start).await {
            Ok(records) => records,
            Err(e) => {
                error!("Error loading network stats records: {}", e);
                return None;
            }
        };

        if records.is_empty() {
            debug!("No records found in the period starting {}", start);
            return None;
        }

        let valid = filter_outliers(&records, self.settings);
        debug!(
            "Calculated averages from {} of {} records",
            valid.len(),
            records.len()
        );

        let averages = average_hashrates(&valid)?;
        Some(PeriodAverages {
            averages,
            record_count: valid.len(),
            period_start: start,
        })
    }
}

/// Keep the records that pass the sliding-window test for every source.
///
/// The first `window_size - 1` records are kept unconditionally. Each later
/// record is checked against the `window_size - 1` records before it.
pub fn filter_outliers(
    records: &[StatsRecord],
    settings: AggregatorSettings,
) -> Vec<&StatsRecord> {
    let window_size = settings.window_size.max(2);

    records
        .iter()
        .enumerate()
        .filter(|(i, record)| {
            if *i < window_size - 1 {
                return true;
            }
            let history = &records[i + 1 - window_size..*i];
            HashrateSource::ALL.iter().all(|source| {
                let previous: Vec<f64> = history.iter().map(|r| r.hashrates.get(*source)).collect();
                is_valid_hashrate(
                    record.hashrates.get(*source),
                    &previous,
                    settings.deviation_threshold,
                )
            })
        })
        .map(|(_, record)| record)
        .collect()
}

/// Arithmetic mean per source, `None` for an empty slice.
pub fn average_hashrates(records: &[&StatsRecord]) -> Option<Hashrates> {
    if records.is_empty() {
        return None;
    }
    let count = records.len() as f64;
    Some(Hashrates::from_fn(|source| {
        records.iter().map(|r| r.hashrates.get(source)).sum::<f64>() / count
    }))
}
