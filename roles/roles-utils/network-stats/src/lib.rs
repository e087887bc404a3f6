//! Network hashrate statistics for Qubic mining pools.
//!
//! This crate samples per-pool hashrates on a fixed cadence, rejects samples
//! that cannot be trusted, persists the rest per weekly period and computes
//! outlier-resistant averages over the current period.
//!
//! Write path: [`SampleRecorder`]. Read path: [`AverageAggregator`]. Both share
//! a [`NetworkStatsStorage`] and report their decisions through the [`EventLog`].

pub mod aggregator;
pub mod event_log;
pub mod period;
pub mod recorder;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod validation;

pub use aggregator::{AggregatorSettings, AverageAggregator, PeriodAverages};
pub use event_log::EventLog;
pub use period::period_start;
pub use recorder::{RecordOutcome, RecorderSettings, SampleRecorder, SkipReason};
pub use snapshot::NetworkSnapshot;
pub use storage::{MemoryStorage, NetworkStatsStorage, SqliteStorage, StorageError};
pub use types::{
    EventType, HashrateSource, Hashrates, LogEntry, PerSource, StatsRecord, ValidationResults,
};
pub use validation::is_valid_hashrate;
