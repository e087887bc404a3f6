use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use network_stats::{
    AggregatorSettings, AverageAggregator, EventLog, EventType, Hashrates, NetworkSnapshot,
    NetworkStatsStorage, RecordOutcome, RecorderSettings, SampleRecorder, SqliteStorage,
};

struct Pipeline {
    storage: Arc<SqliteStorage>,
    recorder: SampleRecorder,
    aggregator: AverageAggregator,
    events: EventLog,
    _temp_dir: TempDir,
}

async fn pipeline() -> Pipeline {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(
        SqliteStorage::new(temp_dir.path().join("network_stats.db"))
            .await
            .unwrap(),
    );
    let events = EventLog::new(storage.clone());
    let recorder = SampleRecorder::new(storage.clone(), events.clone(), RecorderSettings::default());
    let aggregator = AverageAggregator::new(storage.clone(), AggregatorSettings::default());

    Pipeline {
        storage,
        recorder,
        aggregator,
        events,
        _temp_dir: temp_dir,
    }
}

fn rates(scale: f64) -> Hashrates {
    Hashrates {
        qli: 400.0 * scale,
        apool: 100.0 * scale,
        solutions: 80.0 * scale,
        minerlab: 60.0 * scale,
        nevermine: 40.0 * scale,
    }
}

fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

#[tokio::test]
async fn test_samples_are_averaged_over_the_current_period() {
    let p = pipeline().await;
    let start = utc(2024, 5, 2, 0);

    for i in 0..10 {
        let outcome = p
            .recorder
            .record_sample(
                &NetworkSnapshot::new(false, rates(1.0)),
                start + Duration::minutes(5 * i),
            )
            .await;
        assert!(matches!(outcome, RecordOutcome::Recorded { .. }), "{:?}", outcome);
    }

    let averages = p
        .aggregator
        .current_period_averages(start + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(averages.averages, rates(1.0));
    assert_eq!(averages.record_count, 10);
    assert_eq!(averages.period_start, utc(2024, 5, 1, 12));
}

#[tokio::test]
async fn test_spike_is_stored_but_not_averaged() {
    let p = pipeline().await;
    let start = utc(2024, 5, 2, 0);

    for i in 0..6 {
        let scale = if i == 5 { 10.0 } else { 1.0 };
        p.recorder
            .record_sample(
                &NetworkSnapshot::new(false, rates(scale)),
                start + Duration::minutes(5 * i),
            )
            .await;
    }

    assert_eq!(p.storage.records_since(start).await.unwrap().len(), 6);

    let averages = p
        .aggregator
        .current_period_averages(start + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(averages.record_count, 5);
    assert_eq!(averages.averages, rates(1.0));
}

#[tokio::test]
async fn test_rollover_keeps_only_the_previous_and_current_period() {
    let p = pipeline().await;
    let snapshot = NetworkSnapshot::new(false, rates(1.0));

    let in_p0 = utc(2024, 4, 25, 0);
    let in_p1 = utc(2024, 5, 2, 0);
    let in_p2 = utc(2024, 5, 9, 0);

    p.recorder.record_sample(&snapshot, in_p0).await;
    p.recorder.record_sample(&snapshot, in_p1).await;
    p.recorder.record_sample(&snapshot, in_p2).await;

    let remaining: Vec<_> = p
        .storage
        .records_since(in_p0 - Duration::days(30))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.timestamp)
        .collect();
    assert_eq!(remaining, vec![in_p1, in_p2]);

    let averages = p.aggregator.current_period_averages(in_p2).await.unwrap();
    assert_eq!(averages.record_count, 1);
    assert_eq!(averages.period_start, utc(2024, 5, 8, 12));

    // Log entries from P0 were pruned the same way
    let logs = p.events.recent(100).await.unwrap();
    assert!(logs.iter().all(|e| e.timestamp >= utc(2024, 5, 1, 12)));
    assert!(logs.iter().any(|e| e.event_type == EventType::Success));
}

#[tokio::test]
async fn test_rejections_and_skips_are_logged() {
    let p = pipeline().await;
    let now = utc(2024, 5, 2, 0);

    let mut broken = rates(1.0);
    broken.apool = 0.0;
    p.recorder
        .record_sample(&NetworkSnapshot::new(false, broken), now)
        .await;
    p.recorder
        .record_sample(&NetworkSnapshot::new(true, rates(1.0)), now + Duration::minutes(5))
        .await;

    assert!(p.aggregator.current_period_averages(now).await.is_none());

    let logs = p.events.recent(100).await.unwrap();
    let kinds: Vec<EventType> = logs.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![EventType::Skip, EventType::Validation, EventType::Warning]
    );
    assert_eq!(logs[1].data.as_ref().unwrap()["validation_results"]["apool"], false);
}
