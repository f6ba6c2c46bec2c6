//! Layered configuration loading utilities.

use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Settings for the fill listener and its ingestion queue.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryConfig {
    /// JSON log file written alongside stdout logging.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Address of the Prometheus scrape endpoint; disabled when unset.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            ingest: IngestConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            queue_capacity: default_queue_capacity(),
            read_timeout_ms: default_read_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("trades.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_endpoint() -> String {
    "127.0.0.1:5540".into()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

/// Loads configuration from the `config/` directory of the working directory.
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    load_config_from(Path::new("config"), env)
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `{base}/default.toml`
/// 2. `{base}/{environment}.toml` (if `environment` is Some)
/// 3. `{base}/local.toml` (ignored in git)
/// 4. Environment variables prefixed with `GOLDMINE__`
///
/// Every file is optional; missing keys fall back to built-in defaults.
pub fn load_config_from(base_path: &Path, env: Option<&str>) -> Result<AppConfig> {
    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(false));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("GOLDMINE")
            .prefix_separator("__")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}
