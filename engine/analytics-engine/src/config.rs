//! # Configuration Management
//!
//! Configuration structures and management for the AnalyticsEngine.

use crate::error::{AnalyticsError, Result};
use persistence::PersistenceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix, e.g. `ANALYTICS_LIVE__INTERVAL_SECS=2`
pub const ENV_PREFIX: &str = "ANALYTICS";

/// Main configuration for the AnalyticsEngine
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Query limits
    pub query: QueryConfig,
    /// Live dashboard stream
    pub live: LiveConfig,
    /// Diagnostic log ring buffer
    pub log_buffer: LogBufferConfig,
    /// Retention configuration
    pub retention: RetentionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Which event store backs the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// WAL + snapshots under `storage.local.data_dir`
    #[default]
    Local,
    /// Nothing survives a restart
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local: PersistenceConfig,
}

/// Default and maximum page sizes per query family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Usage events, error logs and sessions
    pub default_limit: usize,
    pub max_limit: usize,
    /// Performance metrics
    pub metrics_default_limit: usize,
    pub metrics_max_limit: usize,
    /// Events and metrics included in a session detail
    pub session_detail_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
            metrics_default_limit: 1000,
            metrics_max_limit: 10_000,
            session_detail_limit: 100,
        }
    }
}

/// Live dashboard stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Seconds between pushes
    pub interval_secs: u64,
    /// Pushes buffered per subscriber before the publisher waits
    pub channel_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self { interval_secs: 5, channel_capacity: 16 }
    }
}

/// Log ring buffer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogBufferConfig {
    /// Entries kept before the oldest are evicted
    pub capacity: usize,
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self { capacity: 2000 }
    }
}

/// Longest accepted retention window (100 years)
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Retention configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Run the periodic sweep
    pub enabled: bool,
    /// Usage events, metrics, error logs and costs older than this are purged (days)
    pub days: u32,
    /// Sweep interval (hours)
    pub sweep_interval_hours: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { enabled: true, days: 90, sweep_interval_hours: 24 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `analytics_engine=debug,persistence=info`
    pub level: String,
    /// `pretty`, `json` or `compact`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl AnalyticsConfig {
    /// Load configuration from an optional file overlaid by `ANALYTICS_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(false));
        }

        let config: AnalyticsConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AnalyticsError::invalid_config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AnalyticsError::invalid_config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let config: AnalyticsConfig =
            toml::from_str(&content).map_err(|e| AnalyticsError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AnalyticsError::invalid_config(e.to_string()))?;
        std::fs::write(path.as_ref(), content).map_err(|e| {
            AnalyticsError::invalid_config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(())
    }

    /// Get storage path for the config
    pub fn storage_path(&self) -> &PathBuf {
        &self.storage.local.data_dir
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.storage.local.validate().map_err(AnalyticsError::invalid_config)?;

        let q = &self.query;
        if q.default_limit == 0 || q.default_limit > q.max_limit {
            return Err(AnalyticsError::invalid_config(
                "query.default_limit must be between 1 and query.max_limit",
            ));
        }
        if q.metrics_default_limit == 0 || q.metrics_default_limit > q.metrics_max_limit {
            return Err(AnalyticsError::invalid_config(
                "query.metrics_default_limit must be between 1 and query.metrics_max_limit",
            ));
        }
        if q.session_detail_limit == 0 {
            return Err(AnalyticsError::invalid_config("query.session_detail_limit must be > 0"));
        }

        if self.live.interval_secs == 0 {
            return Err(AnalyticsError::invalid_config("live.interval_secs must be > 0"));
        }
        if self.live.channel_capacity == 0 {
            return Err(AnalyticsError::invalid_config("live.channel_capacity must be > 0"));
        }
        if self.log_buffer.capacity == 0 {
            return Err(AnalyticsError::invalid_config("log_buffer.capacity must be > 0"));
        }
        if self.retention.days == 0 || self.retention.days > MAX_RETENTION_DAYS {
            return Err(AnalyticsError::invalid_config(format!(
                "retention.days must be between 1 and {MAX_RETENTION_DAYS}"
            )));
        }
        if self.retention.enabled && self.retention.sweep_interval_hours == 0 {
            return Err(AnalyticsError::invalid_config(
                "retention.sweep_interval_hours must be > 0",
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(AnalyticsError::invalid_config(format!(
                "logging.level: invalid filter '{}'",
                self.logging.level
            )));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json" | "compact") {
            return Err(AnalyticsError::invalid_config(format!(
                "logging.format: unknown format '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }
}
