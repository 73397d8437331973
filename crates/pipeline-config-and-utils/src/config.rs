//! Configuration management for the pipeline.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

/// Default ingestion endpoint.
pub const DEFAULT_INGESTION_URL: &str = "https://in.telemetry.example.com/logs";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Main pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Endpoint batches are posted to.
    #[serde(default = "default_ingestion_url")]
    pub ingestion_url: String,
    /// Sent as the `App-Secret` header when set.
    #[serde(default)]
    pub app_secret: Option<String>,
    /// Sent as the `Install-ID` header when set.
    #[serde(default)]
    pub install_id: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Channels to register, by name.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelSettings>,
}

/// Settings for one channel as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub max_batch_size: usize,
    pub batch_interval_ms: u64,
    pub max_in_flight: usize,
    pub capacity: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter: f64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            batch_interval_ms: 3_000,
            max_in_flight: 1,
            capacity: 10_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 300_000,
            backoff_jitter: 0.2,
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_ingestion_url() -> String {
    DEFAULT_INGESTION_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            ingestion_url: default_ingestion_url(),
            app_secret: None,
            install_id: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            channels: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from `<base>/config.json`, falling back to
    /// defaults, then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override fields from `PIPELINE_LOG_LEVEL` and `PIPELINE_INGESTION_URL`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(log_level) = lookup("PIPELINE_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.log_level = log_level;
        }
        if let Some(url) = lookup("PIPELINE_INGESTION_URL").filter(|v| !v.trim().is_empty()) {
            self.ingestion_url = url;
        }
    }

    /// Get the ingestion URL as a parsed URL.
    pub fn ingestion_url(&self) -> CoreResult<Url> {
        Url::parse(&self.ingestion_url).map_err(CoreError::from)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let url = self.ingestion_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "ingestion_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
