//! Append-only event log scoped to the current period.
//!
//! Every pipeline decision is written here for operators. Entries older than the
//! previous period boundary are pruned when a new period is first logged.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::period::period_start;
use crate::storage::{self, NetworkStatsStorage};
use crate::types::{EventType, LogEntry};

/// Default number of entries returned by [`EventLog::recent`].
pub const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Clone)]
pub struct EventLog {
    storage: Arc<dyn NetworkStatsStorage>,
}

impl EventLog {
    pub fn new(storage: Arc<dyn NetworkStatsStorage>) -> Self {
        Self { storage }
    }

    /// Record an event. Never fails; storage problems are reported through
    /// `tracing` only.
    pub async fn log(
        &self,
        now: DateTime<Utc>,
        event_type: EventType,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        let message = message.into();
        trace_event(event_type, &message);

        if let Err(e) = self.append(now, event_type, message, data).await {
            error!("Error logging network stats event: {}", e);
        }
    }

    async fn append(
        &self,
        now: DateTime<Utc>,
        event_type: EventType,
        message: String,
        data: Option<Value>,
    ) -> storage::Result<()> {
        let current_period = period_start(now);

        if let Some(last) = self.storage.latest_log_entry().await? {
            if current_period > last.period_start {
                let removed = self
                    .storage
                    .delete_log_entries_before(last.period_start)
                    .await?;
                info!("Cleaned up {} old log entries", removed);
            }
        }

        self.storage
            .insert_log_entry(&LogEntry {
                timestamp: now,
                period_start: current_period,
                event_type,
                message,
                data,
            })
            .await
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> storage::Result<Vec<LogEntry>> {
        self.storage.recent_log_entries(limit).await
    }
}

fn trace_event(event_type: EventType, message: &str) {
    match event_type {
        EventType::Error => error!("[{}] {}", event_type, message),
        EventType::Warning | EventType::Validation => warn!("[{}] {}", event_type, message),
        EventType::Success | EventType::Info => info!("[{}] {}", event_type, message),
        EventType::Skip => debug!("[{}] {}", event_type, message),
    }
}
