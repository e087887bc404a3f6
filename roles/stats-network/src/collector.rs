//! Periodic collection: fetch a network snapshot and hand it to the recorder.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use network_stats::{EventLog, EventType, NetworkSnapshot, RecordOutcome, SampleRecorder};
use serde::Serialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("tool endpoint returned status {0}")]
    Status(u16),

    #[error("invalid tool payload: {0}")]
    InvalidPayload(String),
}

/// Source of the current network snapshot.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<NetworkSnapshot, SnapshotError>;
}

/// Reads the aggregated tool endpoint over HTTP.
pub struct HttpSnapshotProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotProvider {
    pub fn new(
        url: String,
        request_timeout_secs: u64,
        pool_idle_timeout_secs: u64,
    ) -> Result<Self, SnapshotError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(pool_idle_timeout_secs))
            .pool_max_idle_per_host(1)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SnapshotProvider for HttpSnapshotProvider {
    async fn fetch_snapshot(&self) -> Result<NetworkSnapshot, SnapshotError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Status(status.as_u16()));
        }

        let payload: Value = response.json().await?;
        if !payload.is_object() {
            return Err(SnapshotError::InvalidPayload(
                "expected a JSON object".to_string(),
            ));
        }

        Ok(NetworkSnapshot::from_tool_payload(&payload))
    }
}

/// Result of one collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "run", rename_all = "snake_case")]
pub enum CollectionRun {
    Completed { result: RecordOutcome },
    FetchFailed { message: String },
    AlreadyRunning,
}

pub struct Collector {
    provider: Arc<dyn SnapshotProvider>,
    recorder: SampleRecorder,
    events: EventLog,
    in_progress: Mutex<()>,
}

impl Collector {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        recorder: SampleRecorder,
        events: EventLog,
    ) -> Self {
        Self {
            provider,
            recorder,
            events,
            in_progress: Mutex::new(()),
        }
    }

    /// Fetch one snapshot and record it. At most one run is in flight; a call
    /// made while another run holds the guard returns immediately.
    pub async fn run_once(&self, now: DateTime<Utc>) -> CollectionRun {
        let _guard = match self.in_progress.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.events
                    .log(now, EventType::Skip, "Update already in progress", None)
                    .await;
                return CollectionRun::AlreadyRunning;
            }
        };

        self.events
            .log(
                now,
                EventType::Info,
                format!("Scheduled update triggered at {}", now.to_rfc3339()),
                None,
            )
            .await;

        let snapshot = match self.provider.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let message = format!("Failed to get tool data: {}", e);
                self.events
                    .log(now, EventType::Error, message.clone(), None)
                    .await;
                return CollectionRun::FetchFailed { message };
            }
        };

        let result = self.recorder.record_sample(&snapshot, now).await;
        debug!("Collection run finished: {:?}", result);
        CollectionRun::Completed { result }
    }

    /// Run forever on a fixed interval. The first run starts immediately and
    /// missed ticks collapse into a single catch-up run.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Collecting network stats every {} seconds", every.as_secs());

        loop {
            interval.tick().await;
            self.run_once(Utc::now()).await;
        }
    }
}
