//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults, then applies
//!     the deployment environment overrides (PORT, DATA_PATH).
//!
//! structure:
//!     - ServerConfig: where the http/websocket listener binds, static files.
//!     - StorageConfig: reading log location, fsync, i/o timeout.
//!     - HistoryConfig: caps for dated and undated history queries.
//!     - BroadcastConfig: subscriber bound, per-viewer queue and send timeout.
//!     - LoggingConfig: log level, per-reading log line.
//!
//! ==============================================================================

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::history::{HistoryPolicy, DEFAULT_LIMIT};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub history: HistoryConfig,
    pub broadcast: BroadcastConfig,
    pub logging: LoggingConfig,
    /// file this config came from, `None` for built-in defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// dashboard files served for any path the api does not claim
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub fsync: bool,
    /// 0 disables the timeout
    pub io_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    /// 0 falls back to the built-in 100
    pub default_limit: usize,
    /// unset (or 0) returns every reading of the requested day
    pub ranged_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConfig {
    pub max_subscribers: usize,
    pub queue_capacity: usize,
    /// 0 disables the timeout
    pub send_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            static_dir: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data").join("readings.jsonl"),
            fsync: true,
            io_timeout_ms: 5_000,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            ranged_limit: None,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 256,
            queue_capacity: 64,
            send_timeout_ms: 2_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl StorageConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        millis(self.io_timeout_ms)
    }
}

impl BroadcastConfig {
    pub fn send_timeout(&self) -> Option<Duration> {
        millis(self.send_timeout_ms)
    }
}

impl HistoryConfig {
    pub fn policy(&self) -> HistoryPolicy {
        HistoryPolicy {
            default_limit: match self.default_limit {
                0 => DEFAULT_LIMIT,
                limit => limit,
            },
            ranged_limit: self.ranged_limit.filter(|limit| *limit > 0),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address {}:{}: {}", self.bind, self.port, e))
    }
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let mut config = Self::parse(&content)?;
        config.source = Some(path.as_ref().to_path_buf());
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Load with default fallback
    ///
    /// runs before logging is set up, so problems go straight to stderr
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("hub.toml"),
            PathBuf::from("..").join("config").join("hub.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        eprintln!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Apply deployment overrides (`PORT`, `DATA_PATH`)
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(std::env::var("PORT").ok(), std::env::var("DATA_PATH").ok())
    }

    fn apply_overrides(&mut self, port: Option<String>, data_path: Option<String>) -> anyhow::Result<()> {
        if let Some(port) = port.filter(|p| !p.trim().is_empty()) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid PORT {:?}: {}", port, e))?;
        }
        if let Some(path) = data_path.filter(|p| !p.trim().is_empty()) {
            self.storage.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            source = %self
                .source
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string()),
            bind = %self.server.bind,
            port = self.server.port,
            static_dir = ?self.server.static_dir,
            store = %self.storage.path.display(),
            fsync = self.storage.fsync,
            io_timeout_ms = self.storage.io_timeout_ms,
            history_limit = self.history.policy().default_limit,
            day_limit = ?self.history.policy().ranged_limit,
            max_subscribers = self.broadcast.max_subscribers,
            queue_capacity = self.broadcast.queue_capacity,
            send_timeout_ms = self.broadcast.send_timeout_ms,
            "hub configuration"
        );
    }
}
