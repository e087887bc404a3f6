//! SQLite storage backend for network stats.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;

use super::{NetworkStatsStorage, Result, StorageError};
use crate::types::{EventType, HashrateSource, Hashrates, LogEntry, StatsRecord};

const RECORD_COLUMNS: &str = "timestamp, period_start, qli_hashrate, apool_hashrate, \
     solutions_hashrate, minerlab_hashrate, nevermine_hashrate, was_idle";

const LOG_COLUMNS: &str = "timestamp, period_start, event_type, message, data";

/// SQLite-backed storage implementation.
///
/// Instants are stored as INTEGER microseconds since the Unix epoch.
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

impl SqliteStorage {
    /// Open (or create) the database at `db_path` and make sure the schema exists.
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connection_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connection_options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS network_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                period_start INTEGER NOT NULL,
                qli_hashrate REAL NOT NULL,
                apool_hashrate REAL NOT NULL,
                solutions_hashrate REAL NOT NULL,
                minerlab_hashrate REAL NOT NULL,
                nevermine_hashrate REAL NOT NULL,
                was_idle INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS network_stats_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                period_start INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                message TEXT NOT NULL,
                data TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_network_stats_timestamp ON network_stats(timestamp)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_network_stats_logs_timestamp ON network_stats_logs(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn record_from_row(row: &SqliteRow) -> Result<StatsRecord> {
        Ok(StatsRecord {
            timestamp: from_micros(row.try_get("timestamp")?)?,
            period_start: from_micros(row.try_get("period_start")?)?,
            hashrates: Hashrates {
                qli: row.try_get("qli_hashrate")?,
                apool: row.try_get("apool_hashrate")?,
                solutions: row.try_get("solutions_hashrate")?,
                minerlab: row.try_get("minerlab_hashrate")?,
                nevermine: row.try_get("nevermine_hashrate")?,
            },
            was_idle: row.try_get("was_idle")?,
        })
    }

    fn log_entry_from_row(row: &SqliteRow) -> Result<LogEntry> {
        let event_type: String = row.try_get("event_type")?;
        let data: Option<String> = row.try_get("data")?;

        Ok(LogEntry {
            timestamp: from_micros(row.try_get("timestamp")?)?,
            period_start: from_micros(row.try_get("period_start")?)?,
            event_type: EventType::from_str(&event_type).map_err(StorageError::Corrupt)?,
            message: row.try_get("message")?,
            data: data
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()?,
        })
    }
}

fn hashrate_column(source: HashrateSource) -> &'static str {
    match source {
        HashrateSource::Qli => "qli_hashrate",
        HashrateSource::Apool => "apool_hashrate",
        HashrateSource::Solutions => "solutions_hashrate",
        HashrateSource::Minerlab => "minerlab_hashrate",
        HashrateSource::Nevermine => "nevermine_hashrate",
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {}", micros)))
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl NetworkStatsStorage for SqliteStorage {
    async fn latest_record(&self) -> Result<Option<StatsRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM network_stats ORDER BY timestamp DESC, id DESC LIMIT 1",
            RECORD_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn recent_positive_values(
        &self,
        source: HashrateSource,
        limit: usize,
    ) -> Result<Vec<f64>> {
        let column = hashrate_column(source);
        let rows = sqlx::query(&format!(
            "SELECT {col} FROM network_stats WHERE {col} > 0 ORDER BY timestamp DESC, id DESC LIMIT ?",
            col = column
        ))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<f64, _>(column).map_err(StorageError::from))
            .collect()
    }

    async fn records_since(&self, from: DateTime<Utc>) -> Result<Vec<StatsRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM network_stats WHERE timestamp >= ? ORDER BY timestamp ASC, id ASC",
            RECORD_COLUMNS
        ))
        .bind(to_micros(from))
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!("Loaded {} network stats records since {}", rows.len(), from);

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn insert_record_if_latest(
        &self,
        record: &StatsRecord,
        expected_latest: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        // One statement, so the check and the insert cannot interleave with
        // another writer.
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO network_stats ({})
            SELECT ?, ?, ?, ?, ?, ?, ?, ?
            WHERE (SELECT MAX(timestamp) FROM network_stats) IS ?
            "#,
            RECORD_COLUMNS
        ))
        .bind(to_micros(record.timestamp))
        .bind(to_micros(record.period_start))
        .bind(record.hashrates.qli)
        .bind(record.hashrates.apool)
        .bind(record.hashrates.solutions)
        .bind(record.hashrates.minerlab)
        .bind(record.hashrates.nevermine)
        .bind(record.was_idle)
        .bind(expected_latest.map(to_micros))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_records_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM network_stats WHERE timestamp < ?")
            .bind(to_micros(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn latest_log_entry(&self) -> Result<Option<LogEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM network_stats_logs ORDER BY timestamp DESC, id DESC LIMIT 1",
            LOG_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::log_entry_from_row).transpose()
    }

    async fn insert_log_entry(&self, entry: &LogEntry) -> Result<()> {
        let data = entry.data.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(&format!(
            "INSERT INTO network_stats_logs ({}) VALUES (?, ?, ?, ?, ?)",
            LOG_COLUMNS
        ))
        .bind(to_micros(entry.timestamp))
        .bind(to_micros(entry.period_start))
        .bind(entry.event_type.as_str())
        .bind(&entry.message)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_log_entries_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM network_stats_logs WHERE timestamp < ?")
            .bind(to_micros(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn recent_log_entries(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM network_stats_logs ORDER BY timestamp DESC, id DESC LIMIT ?",
            LOG_COLUMNS
        ))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::log_entry_from_row).collect()
    }
}
