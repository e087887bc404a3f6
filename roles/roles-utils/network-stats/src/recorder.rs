//! Write path: admit a snapshot as a stats record.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::event_log::EventLog;
use crate::period::period_start;
use crate::snapshot::NetworkSnapshot;
use crate::storage::{self, NetworkStatsStorage};
use crate::types::{EventType, HashrateSource, Hashrates, StatsRecord, ValidationResults};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecorderSettings {
    /// Minimum spacing between two stored records.
    pub min_record_interval: Duration,

    /// Wait after an idle observation before recording again.
    pub idle_recovery_wait: Duration,

    /// How many past positive values back a missing primary-source value.
    pub fallback_records: usize,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            min_record_interval: Duration::seconds(300),
            idle_recovery_wait: Duration::seconds(300),
            fallback_records: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    TooSoon { elapsed_secs: f64 },
    Idle,
    IdleRecovery { elapsed_secs: f64 },
    ConcurrentWrite,
}

/// What a single `record_sample` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded { record: StatsRecord },
    Skipped { skip: SkipReason },
    Rejected { validation_results: ValidationResults },
    Failed { message: String },
}

pub struct SampleRecorder {
    storage: Arc<dyn NetworkStatsStorage>,
    events: EventLog,
    settings: RecorderSettings,
}

impl SampleRecorder {
    pub fn new(
        storage: Arc<dyn NetworkStatsStorage>,
        events: EventLog,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            storage,
            events,
            settings,
        }
    }

    /// Try to persist `snapshot` as the record for `now`.
    ///
    /// Never returns an error: store failures are written to the event log and
    /// reported as [`RecordOutcome::Failed`].
    pub async fn record_sample(
        &self,
        snapshot: &NetworkSnapshot,
        now: DateTime<Utc>,
    ) -> RecordOutcome {
        debug!("Starting network stats calculation at {}", now);

        match self.try_record(snapshot, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("Error calculating network stats: {}", e);
                self.events
                    .log(now, EventType::Error, message.clone(), None)
                    .await;
                RecordOutcome::Failed { message }
            }
        }
    }

    async fn try_record(
        &self,
        snapshot: &NetworkSnapshot,
        now: DateTime<Utc>,
    ) -> storage::Result<RecordOutcome> {
        let last_record = self.storage.latest_record().await?;

        if let Some(last) = &last_record {
            let elapsed = now - last.timestamp;
            if elapsed < self.settings.min_record_interval {
                let elapsed_secs = seconds(elapsed);
                self.skip(
                    now,
                    format!("Only {:.1} seconds since last record", elapsed_secs),
                )
                .await;
                return Ok(RecordOutcome::Skipped {
                    skip: SkipReason::TooSoon { elapsed_secs },
                });
            }
        }

        if snapshot.idle {
            self.skip(now, format!("Mining is idle at {}", now.to_rfc3339()))
                .await;
            return Ok(RecordOutcome::Skipped {
                skip: SkipReason::Idle,
            });
        }

        if let Some(last) = last_record.as_ref().filter(|r| r.was_idle) {
            let elapsed = now - last.timestamp;
            if elapsed < self.settings.idle_recovery_wait {
                let elapsed_secs = seconds(elapsed);
                self.skip(
                    now,
                    format!("Only {:.1} seconds since idle recovery", elapsed_secs),
                )
                .await;
                return Ok(RecordOutcome::Skipped {
                    skip: SkipReason::IdleRecovery { elapsed_secs },
                });
            }
        }

        let mut hashrates = snapshot.hashrates;
        let validation_results = self.validate(&mut hashrates, now).await?;

        if !validation_results.all_valid() {
            self.events
                .log(
                    now,
                    EventType::Validation,
                    "Skipping record with abnormal values",
                    Some(json!({
                        "hashrates": hashrates,
                        "validation_results": validation_results,
                        "invalid_sources": validation_results.invalid_sources(),
                    })),
                )
                .await;
            return Ok(RecordOutcome::Rejected { validation_results });
        }

        let current_period = period_start(now);

        if let Some(last) = &last_record {
            if current_period > last.period_start {
                let removed = self.storage.delete_records_before(last.period_start).await?;
                info!("New period started, deleted {} old records", removed);
            }
        }

        let record = StatsRecord {
            timestamp: now,
            period_start: current_period,
            hashrates,
            was_idle: snapshot.idle,
        };

        let expected_latest = last_record.as_ref().map(|r| r.timestamp);
        if !self
            .storage
            .insert_record_if_latest(&record, expected_latest)
            .await?
        {
            self.skip(now, "Concurrent write detected, another record was stored first")
                .await;
            return Ok(RecordOutcome::Skipped {
                skip: SkipReason::ConcurrentWrite,
            });
        }

        self.events
            .log(
                now,
                EventType::Success,
                "Successfully recorded network stats",
                Some(json!({
                    "hashrates": hashrates,
                    "validation_results": validation_results,
                })),
            )
            .await;

        Ok(RecordOutcome::Recorded { record })
    }

    /// Every source must be strictly positive. The primary source may instead be
    /// replaced by the mean of its recent positive values.
    async fn validate(
        &self,
        hashrates: &mut Hashrates,
        now: DateTime<Utc>,
    ) -> storage::Result<ValidationResults> {
        let mut results = ValidationResults::from_fn(|source| hashrates.get(source) > 0.0);

        let primary = HashrateSource::Qli;
        if !results.get(primary) {
            self.events
                .log(now, EventType::Warning, "QLI hashrate is non-positive", None)
                .await;

            let recent = self
                .storage
                .recent_positive_values(primary, self.settings.fallback_records)
                .await?;
            if !recent.is_empty() {
                let average = recent.iter().sum::<f64>() / recent.len() as f64;
                hashrates.set(primary, average);
                results.set(primary, true);
                self.events
                    .log(
                        now,
                        EventType::Info,
                        format!("Using average of last {} records for QLI", recent.len()),
                        None,
                    )
                    .await;
            }
        }

        let pools_invalid = HashrateSource::ALL
            .iter()
            .any(|s| !s.is_primary() && !results.get(*s));
        if pools_invalid {
            self.events
                .log(
                    now,
                    EventType::Warning,
                    "Some pool hashrate is non-positive",
                    Some(json!(hashrates)),
                )
                .await;
        }

        Ok(results)
    }

    async fn skip(&self, now: DateTime<Utc>, message: impl Into<String>) {
        self.events.log(now, EventType::Skip, message, None).await;
    }
}

fn seconds(elapsed: Duration) -> f64 {
    elapsed.num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::LogEntry;
    use chrono::TimeZone;

    fn healthy() -> Hashrates {
        Hashrates {
            qli: 400.0,
            apool: 100.0,
            solutions: 80.0,
            minerlab: 60.0,
            nevermine: 40.0,
        }
    }

    fn setup_with(settings: RecorderSettings) -> (Arc<MemoryStorage>, SampleRecorder) {
        let storage = Arc::new(MemoryStorage::new());
        let events = EventLog::new(storage.clone());
        let recorder = SampleRecorder::new(storage.clone(), events, settings);
        (storage, recorder)
    }

    fn setup() -> (Arc<MemoryStorage>, SampleRecorder) {
        setup_with(RecorderSettings::default())
    }

    fn thursday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap()
    }

    fn events_of(entries: &[LogEntry], event_type: EventType) -> Vec<&LogEntry> {
        entries.iter().filter(|e| e.event_type == event_type).collect()
    }

    #[tokio::test]
    async fn test_records_valid_snapshot() {
        let (storage, recorder) = setup();
        let now = thursday();

        let outcome = recorder
            .record_sample(&NetworkSnapshot::new(false, healthy()), now)
            .await;

        let records = storage.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hashrates, healthy());
        assert_eq!(records[0].timestamp, now);
        assert_eq!(records[0].period_start, period_start(now));
        assert!(!records[0].was_idle);
        assert_eq!(
            outcome,
            RecordOutcome::Recorded {
                record: records[0].clone()
            }
        );

        let logs = storage.log_entries().await;
        let success = events_of(&logs, EventType::Success);
        assert_eq!(success.len(), 1);
        assert_eq!(success[0].data.as_ref().unwrap()["hashrates"]["qli"], 400.0);
    }

    #[tokio::test]
    async fn test_idle_snapshot_writes_nothing() {
        let (storage, recorder) = setup();

        let outcome = recorder
            .record_sample(&NetworkSnapshot::new(true, healthy()), thursday())
            .await;

        assert_eq!(
            outcome,
            RecordOutcome::Skipped {
                skip: SkipReason::Idle
            }
        );
        assert!(storage.records().await.is_empty());
        let logs = storage.log_entries().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event_type, EventType::Skip);
    }

    #[tokio::test]
    async fn test_second_call_within_interval_is_skipped() {
        let (storage, recorder) = setup();
        let snapshot = NetworkSnapshot::new(false, healthy());

        recorder.record_sample(&snapshot, thursday()).await;
        let outcome = recorder
            .record_sample(&snapshot, thursday() + Duration::seconds(60))
            .await;

        assert_eq!(
            outcome,
            RecordOutcome::Skipped {
                skip: SkipReason::TooSoon { elapsed_secs: 60.0 }
            }
        );
        assert_eq!(storage.records().await.len(), 1);

        let logs = storage.log_entries().await;
        let skips = events_of(&logs, EventType::Skip);
        assert_eq!(skips.len(), 1);
        assert_eq!(skips[0].message, "Only 60.0 seconds since last record");
    }

    #[tokio::test]
    async fn test_call_after_interval_is_recorded() {
        let (storage, recorder) = setup();
        let snapshot = NetworkSnapshot::new(false, healthy());

        recorder.record_sample(&snapshot, thursday()).await;
        recorder
            .record_sample(&snapshot, thursday() + Duration::seconds(300))
            .await;

        assert_eq!(storage.records().await.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_pool_value_is_rejected() {
        let (storage, recorder) = setup();
        let mut rates = healthy();
        rates.solutions = 0.0;

        let outcome = recorder
            .record_sample(&NetworkSnapshot::new(false, rates), thursday())
            .await;

        let mut expected = ValidationResults::splat(true);
        expected.solutions = false;
        assert_eq!(
            outcome,
            RecordOutcome::Rejected {
                validation_results: expected
            }
        );
        assert!(storage.records().await.is_empty());

        let logs = storage.log_entries().await;
        let validation = events_of(&logs, EventType::Validation);
        assert_eq!(validation.len(), 1);
        let data = validation[0].data.as_ref().unwrap();
        assert_eq!(data["validation_results"]["solutions"], false);
        assert_eq!(data["validation_results"]["apool"], true);
        assert_eq!(data["hashrates"]["solutions"], 0.0);
        assert_eq!(data["invalid_sources"], json!(["solutions"]));
        assert_eq!(events_of(&logs, EventType::Warning).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_primary_without_history_is_rejected() {
        let (storage, recorder) = setup();
        let mut rates = healthy();
        rates.qli = 0.0;

        let outcome = recorder
            .record_sample(&NetworkSnapshot::new(false, rates), thursday())
            .await;

        assert!(matches!(outcome, RecordOutcome::Rejected { validation_results } if !validation_results.qli));
        assert!(storage.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_primary_recovered_from_history() {
        let (storage, recorder) = setup();
        let base = thursday() - Duration::hours(1);
        for (i, qli) in [100.0, 200.0, 0.0, 300.0].into_iter().enumerate() {
            let ts = base + Duration::minutes(5 * i as i64);
            storage
                .seed_record(StatsRecord {
                    timestamp: ts,
                    period_start: period_start(ts),
                    hashrates: Hashrates { qli, ..healthy() },
                    was_idle: false,
                })
                .await;
        }

        let mut rates = healthy();
        rates.qli = -1.0;
        let outcome = recorder
            .record_sample(&NetworkSnapshot::new(false, rates), thursday())
            .await;

        let RecordOutcome::Recorded { record } = outcome else {
            panic!("expected a record, got {:?}", outcome);
        };
        assert_eq!(record.hashrates.qli, 200.0);

        let logs = storage.log_entries().await;
        assert_eq!(events_of(&logs, EventType::Warning).len(), 1);
        let info = events_of(&logs, EventType::Info);
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].message, "Using average of last 3 records for QLI");
    }

    #[tokio::test]
    async fn test_primary_fallback_uses_at_most_configured_records() {
        let (storage, recorder) = setup_with(RecorderSettings {
            fallback_records: 2,
            ..RecorderSettings::default()
        });
        let base = thursday() - Duration::hours(1);
        for (i, qli) in [1000.0, 100.0, 300.0].into_iter().enumerate() {
            let ts = base + Duration::minutes(5 * i as i64);
            storage
                .seed_record(StatsRecord {
                    timestamp: ts,
                    period_start: period_start(ts),
                    hashrates: Hashrates { qli, ..healthy() },
                    was_idle: false,
                })
                .await;
        }

        let mut rates = healthy();
        rates.qli = 0.0;
        let outcome = recorder
            .record_sample(&NetworkSnapshot::new(false, rates), thursday())
            .await;

        let RecordOutcome::Recorded { record } = outcome else {
            panic!("expected a record, got {:?}", outcome);
        };
        assert_eq!(record.hashrates.qli, 200.0);
    }

    #[tokio::test]
    async fn test_idle_recovery_wait() {
        let (storage, recorder) = setup_with(RecorderSettings {
            min_record_interval: Duration::seconds(60),
            idle_recovery_wait: Duration::seconds(600),
            ..RecorderSettings::default()
        });
        let last = thursday();
        storage
            .seed_record(StatsRecord {
                timestamp: last,
                period_start: period_start(last),
                hashrates: healthy(),
                was_idle: true,
            })
            .await;

        let snapshot = NetworkSnapshot::new(false, healthy());
        let outcome = recorder
            .record_sample(&snapshot, last + Duration::seconds(120))
            .await;
        assert_eq!(
            outcome,
            RecordOutcome::Skipped {
                skip: SkipReason::IdleRecovery {
                    elapsed_secs: 120.0
                }
            }
        );

        let outcome = recorder
            .record_sample(&snapshot, last + Duration::seconds(600))
            .await;
        assert!(matches!(outcome, RecordOutcome::Recorded { .. }));
        assert_eq!(storage.records().await.len(), 2);
    }

    #[tokio::test]
    async fn test_rollover_prunes_records_before_previous_period() {
        let (storage, recorder) = setup();
        // P0 starts 04-24, P1 starts 05-01, P2 starts 05-08
        let in_p0 = Utc.with_ymd_and_hms(2024, 4, 25, 0, 0, 0).unwrap();
        let in_p1 = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let in_p2 = Utc.with_ymd_and_hms(2024, 5, 9, 0, 0, 0).unwrap();
        let snapshot = NetworkSnapshot::new(false, healthy());

        recorder.record_sample(&snapshot, in_p0).await;
        recorder.record_sample(&snapshot, in_p1).await;
        assert_eq!(storage.records().await.len(), 2);

        recorder.record_sample(&snapshot, in_p2).await;
        let timestamps: Vec<_> = storage
            .records()
            .await
            .into_iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(timestamps, vec![in_p1, in_p2]);
    }

    /// Lets another writer slip a record in right after the recorder reads the latest one.
    struct RacingStorage {
        inner: MemoryStorage,
        intruder: tokio::sync::Mutex<Option<StatsRecord>>,
    }

    #[async_trait::async_trait]
    impl NetworkStatsStorage for RacingStorage {
        async fn latest_record(&self) -> storage::Result<Option<StatsRecord>> {
            let latest = self.inner.latest_record().await?;
            if let Some(record) = self.intruder.lock().await.take() {
                self.inner.seed_record(record).await;
            }
            Ok(latest)
        }

        async fn recent_positive_values(
            &self,
            source: HashrateSource,
            limit: usize,
        ) -> storage::Result<Vec<f64>> {
            self.inner.recent_positive_values(source, limit).await
        }

        async fn records_since(&self, from: DateTime<Utc>) -> storage::Result<Vec<StatsRecord>> {
            self.inner.records_since(from).await
        }

        async fn insert_record_if_latest(
            &self,
            record: &StatsRecord,
            expected_latest: Option<DateTime<Utc>>,
        ) -> storage::Result<bool> {
            self.inner.insert_record_if_latest(record, expected_latest).await
        }

        async fn delete_records_before(&self, cutoff: DateTime<Utc>) -> storage::Result<u64> {
            self.inner.delete_records_before(cutoff).await
        }

        async fn latest_log_entry(&self) -> storage::Result<Option<LogEntry>> {
            self.inner.latest_log_entry().await
        }

        async fn insert_log_entry(&self, entry: &LogEntry) -> storage::Result<()> {
            self.inner.insert_log_entry(entry).await
        }

        async fn delete_log_entries_before(&self, cutoff: DateTime<Utc>) -> storage::Result<u64> {
            self.inner.delete_log_entries_before(cutoff).await
        }

        async fn recent_log_entries(&self, limit: usize) -> storage::Result<Vec<LogEntry>> {
            self.inner.recent_log_entries(limit).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_write_is_detected() {
        let now = thursday();
        let storage = Arc::new(RacingStorage {
            inner: MemoryStorage::new(),
            intruder: tokio::sync::Mutex::new(Some(StatsRecord {
                timestamp: now - Duration::seconds(1),
                period_start: period_start(now),
                hashrates: healthy(),
                was_idle: false,
            })),
        });
        let recorder = SampleRecorder::new(
            storage.clone(),
            EventLog::new(storage.clone()),
            RecorderSettings::default(),
        );

        let outcome = recorder
            .record_sample(&NetworkSnapshot::new(false, healthy()), now)
            .await;

        assert_eq!(
            outcome,
            RecordOutcome::Skipped {
                skip: SkipReason::ConcurrentWrite
            }
        );
        let records = storage.inner.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, now - Duration::seconds(1));
        let logs = storage.inner.log_entries().await;
        assert_eq!(events_of(&logs, EventType::Skip).len(), 1);
        assert!(events_of(&logs, EventType::Success).is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_logged_and_swallowed() {
        let (storage, recorder) = setup();
        storage.set_unavailable(true);

        let outcome = recorder
            .record_sample(&NetworkSnapshot::new(false, healthy()), thursday())
            .await;

        assert!(matches!(outcome, RecordOutcome::Failed { message } if message.starts_with("Error calculating network stats")));
        storage.set_unavailable(false);
        assert!(storage.records().await.is_empty());
    }
}
