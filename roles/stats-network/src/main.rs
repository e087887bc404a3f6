use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use network_stats::{AverageAggregator, EventLog, NetworkStatsStorage, SampleRecorder, SqliteStorage};
use stats_network::{
    api,
    collector::{Collector, HttpSnapshotProvider},
    config::Config,
    ServiceState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_args()?;

    // Setup tracing with optional file output
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt().with_env_filter(env_filter);

    if let Some(log_file) = &config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| format!("Failed to open log file {}: {}", log_file, e))?;
        fmt_layer.with_writer(Arc::new(file)).init();
    } else {
        fmt_layer.init();
    }

    info!("Starting stats-network service");
    info!("HTTP server: {}", config.http_address);
    info!("Database: {}", config.db_path);
    info!("Snapshot source: {}", config.snapshot_url);

    let storage: Arc<dyn NetworkStatsStorage> = Arc::new(SqliteStorage::new(&config.db_path).await?);
    let events = EventLog::new(storage.clone());
    let recorder = SampleRecorder::new(storage.clone(), events.clone(), config.recorder);
    let aggregator = AverageAggregator::new(storage, config.aggregator);

    let provider = HttpSnapshotProvider::new(
        config.snapshot_url.clone(),
        config.request_timeout_secs,
        config.pool_idle_timeout_secs,
    )?;
    let collector = Arc::new(Collector::new(Arc::new(provider), recorder, events.clone()));

    let interval = Duration::from_secs(config.collect_interval_secs);
    tokio::spawn(collector.clone().run(interval));

    let state = Arc::new(ServiceState {
        aggregator,
        events,
        collector,
    });

    if let Err(e) = api::run_http_server(config.http_address, state).await {
        error!("HTTP server error: {}", e);
        return Err(e);
    }

    Ok(())
}
