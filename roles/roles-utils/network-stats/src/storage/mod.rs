//! Storage abstraction for network stats records and event log entries.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{HashrateSource, LogEntry, StatsRecord};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable owner of stats records and log entries.
///
/// Both collections are ordered by `timestamp`. Single operations are atomic;
/// sequences of operations are not.
#[async_trait::async_trait]
pub trait NetworkStatsStorage: Send + Sync {
    /// Most recent record by timestamp.
    async fn latest_record(&self) -> Result<Option<StatsRecord>>;

    /// Up to `limit` strictly positive values of `source`, newest first.
    async fn recent_positive_values(&self, source: HashrateSource, limit: usize)
        -> Result<Vec<f64>>;

    /// All records with `timestamp >= from`, oldest first.
    async fn records_since(&self, from: DateTime<Utc>) -> Result<Vec<StatsRecord>>;

    /// Insert `record` only if the newest stored record still has timestamp
    /// `expected_latest` (`None`: no records stored). Returns whether the
    /// record was written.
    async fn insert_record_if_latest(
        &self,
        record: &StatsRecord,
        expected_latest: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Delete records with `timestamp < cutoff`, returning how many were removed.
    async fn delete_records_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Most recent log entry by timestamp.
    async fn latest_log_entry(&self) -> Result<Option<LogEntry>>;

    async fn insert_log_entry(&self, entry: &LogEntry) -> Result<()>;

    /// Delete log entries with `timestamp < cutoff`, returning how many were removed.
    async fn delete_log_entries_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Up to `limit` log entries, newest first.
    async fn recent_log_entries(&self, limit: usize) -> Result<Vec<LogEntry>>;
}
