use chrono::Duration;
use network_stats::{AggregatorSettings, RecorderSettings};
use serde::Deserialize;
use std::{env, fs};

const DEFAULT_CONFIG_PATH: &str = "config/stats-network.config.toml";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_address: String,
    pub db_path: String,
    pub snapshot_url: String,
    pub collect_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub pool_idle_timeout_secs: u64,
    pub recorder: RecorderSettings,
    pub aggregator: AggregatorSettings,
    pub log_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StatsNetworkConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    collector: CollectorConfig,
    #[serde(default)]
    http_client: HttpClientConfig,
    #[serde(default)]
    pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ServerConfig {
    http_listen_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_listen_address: Some("127.0.0.1:9085".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StorageConfig {
    db_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: Some(".devenv/state/stats-network/network_stats.db".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CollectorConfig {
    snapshot_url: Option<String>,
    interval_secs: Option<u64>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            snapshot_url: Some("http://127.0.0.1:5000/api/qubic/tool".to_string()),
            interval_secs: Some(300),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HttpClientConfig {
    pool_idle_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout_secs: Some(300),
            request_timeout_secs: Some(30),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PipelineConfig {
    min_record_interval_secs: Option<i64>,
    idle_recovery_secs: Option<i64>,
    fallback_records: Option<usize>,
    window_size: Option<usize>,
    deviation_threshold: Option<f64>,
}

impl PipelineConfig {
    fn recorder_settings(&self) -> RecorderSettings {
        let defaults = RecorderSettings::default();
        RecorderSettings {
            min_record_interval: self
                .min_record_interval_secs
                .map(Duration::seconds)
                .unwrap_or(defaults.min_record_interval),
            idle_recovery_wait: self
                .idle_recovery_secs
                .map(Duration::seconds)
                .unwrap_or(defaults.idle_recovery_wait),
            fallback_records: self.fallback_records.unwrap_or(defaults.fallback_records),
        }
    }

    fn aggregator_settings(&self) -> AggregatorSettings {
        let defaults = AggregatorSettings::default();
        AggregatorSettings {
            window_size: self.window_size.unwrap_or(defaults.window_size).max(2),
            deviation_threshold: self
                .deviation_threshold
                .unwrap_or(defaults.deviation_threshold),
        }
    }
}

fn arg_value(args: &[String], names: &[&str]) -> Option<String> {
    args.iter()
        .position(|arg| names.contains(&arg.as_str()))
        .and_then(|i| args.get(i + 1))
        .cloned()
}

impl Config {
    pub fn from_args() -> Result<Self, Box<dyn std::error::Error>> {
        let args: Vec<String> = env::args().collect();
        Self::from_arg_list(&args)
    }

    pub fn from_arg_list(args: &[String]) -> Result<Self, Box<dyn std::error::Error>> {
        let log_file = arg_value(args, &["-f", "--log-file"]);

        let config_path =
            arg_value(args, &["--config", "-c"]).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let config_str = fs::read_to_string(&config_path).unwrap_or_default();
        let file_config: StatsNetworkConfig = if config_str.trim().is_empty() {
            StatsNetworkConfig::default()
        } else {
            toml::from_str(&config_str)?
        };

        let http_address = arg_value(args, &["--http-address", "-h"])
            .or(file_config.server.http_listen_address)
            .ok_or("Missing required config: server.http_listen_address")?;

        let db_path = arg_value(args, &["--db-path"])
            .or(file_config.storage.db_path)
            .ok_or("Missing required config: storage.db_path")?;

        let snapshot_url = arg_value(args, &["--snapshot-url", "-s"])
            .or(file_config.collector.snapshot_url)
            .ok_or("Missing required config: collector.snapshot_url")?;

        let collect_interval_secs = file_config.collector.interval_secs.unwrap_or(300);
        if collect_interval_secs == 0 {
            return Err("collector.interval_secs must be greater than zero".into());
        }

        let aggregator = file_config.pipeline.aggregator_settings();
        if !aggregator.deviation_threshold.is_finite() || aggregator.deviation_threshold < 0.0 {
            return Err(
                "pipeline.deviation_threshold must be a finite, non-negative number".into(),
            );
        }

        Ok(Config {
            http_address,
            db_path,
            snapshot_url,
            collect_interval_secs,
            request_timeout_secs: file_config.http_client.request_timeout_secs.unwrap_or(30),
            pool_idle_timeout_secs: file_config
                .http_client
                .pool_idle_timeout_secs
                .unwrap_or(300),
            recorder: file_config.pipeline.recorder_settings(),
            aggregator,
            log_file,
        })
    }
}
