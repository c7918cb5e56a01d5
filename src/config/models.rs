use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP status surface
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// On-disk locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Credential cipher passphrase (loaded from environment, never from file)
    #[serde(skip)]
    pub passphrase: Option<String>,
}

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn downloads_root(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            passphrase: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Download orchestrator limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_progress_persist_ms")]
    pub progress_persist_ms: u64,
    #[serde(default = "default_download_queue_capacity")]
    pub queue_capacity: usize,
}

impl DownloadsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn progress_persist_interval(&self) -> Duration {
        Duration::from_millis(self.progress_persist_ms)
    }
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_download_timeout_secs(),
            progress_persist_ms: default_progress_persist_ms(),
            queue_capacity: default_download_queue_capacity(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_download_timeout_secs() -> u64 {
    3600
}

fn default_progress_persist_ms() -> u64 {
    1000
}

fn default_download_queue_capacity() -> usize {
    256
}

/// Outbound webhook delivery
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhooksConfig {
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_webhook_queue_capacity")]
    pub queue_capacity: usize,
}

impl WebhooksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_webhook_timeout_secs(),
            user_agent: default_user_agent(),
            queue_capacity: default_webhook_queue_capacity(),
        }
    }
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("bulksync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_webhook_queue_capacity() -> usize {
    1024
}

/// Logging
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
