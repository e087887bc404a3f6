//! In-memory storage for tests.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{NetworkStatsStorage, Result, StorageError};
use crate::types::{HashrateSource, LogEntry, StatsRecord};

#[derive(Default)]
struct Collections {
    // Both kept sorted ascending by timestamp
    records: Vec<StatsRecord>,
    logs: Vec<LogEntry>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Collections>,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a record unconditionally, bypassing the latest-timestamp check.
    pub async fn seed_record(&self, record: StatsRecord) {
        let mut inner = self.inner.lock().await;
        let at = inner.records.partition_point(|r| r.timestamp <= record.timestamp);
        inner.records.insert(at, record);
    }

    pub async fn records(&self) -> Vec<StatsRecord> {
        self.inner.lock().await.records.clone()
    }

    pub async fn log_entries(&self) -> Vec<LogEntry> {
        self.inner.lock().await.logs.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory storage switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl NetworkStatsStorage for MemoryStorage {
    async fn latest_record(&self) -> Result<Option<StatsRecord>> {
        self.check_available()?;
        Ok(self.inner.lock().await.records.last().cloned())
    }

    async fn recent_positive_values(
        &self,
        source: HashrateSource,
        limit: usize,
    ) -> Result<Vec<f64>> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .iter()
            .rev()
            .map(|r| r.hashrates.get(source))
            .filter(|v| *v > 0.0)
            .take(limit)
            .collect())
    }

    async fn records_since(&self, from: DateTime<Utc>) -> Result<Vec<StatsRecord>> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .iter()
            .filter(|r| r.timestamp >= from)
            .cloned()
            .collect())
    }

    async fn insert_record_if_latest(
        &self,
        record: &StatsRecord,
        expected_latest: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let current = inner.records.last().map(|r| r.timestamp);
        if current != expected_latest {
            return Ok(false);
        }
        let at = inner.records.partition_point(|r| r.timestamp <= record.timestamp);
        inner.records.insert(at, record.clone());
        Ok(true)
    }

    async fn delete_records_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let before = inner.records.len();
        inner.records.retain(|r| r.timestamp >= cutoff);
        Ok((before - inner.records.len()) as u64)
    }

    async fn latest_log_entry(&self) -> Result<Option<LogEntry>> {
        self.check_available()?;
        Ok(self.inner.lock().await.logs.last().cloned())
    }

    async fn insert_log_entry(&self, entry: &LogEntry) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let at = inner.logs.partition_point(|e| e.timestamp <= entry.timestamp);
        inner.logs.insert(at, entry.clone());
        Ok(())
    }

    async fn delete_log_entries_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let before = inner.logs.len();
        inner.logs.retain(|e| e.timestamp >= cutoff);
        Ok((before - inner.logs.len()) as u64)
    }

    async fn recent_log_entries(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner.logs.iter().rev().take(limit).cloned().collect())
    }
}
