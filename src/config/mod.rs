//! Configuration management for bulksync
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use bulksync::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Downloads land in: {}", config.storage.downloads_root().display());
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `BULKSYNC__<section>__<key>`
//!
//! Examples:
//! - `BULKSYNC__SERVER__BIND_ADDR=127.0.0.1:9000`
//! - `BULKSYNC__DOWNLOADS__MAX_CONCURRENT=6`
//! - `BULKSYNC__STORAGE__DATA_DIR=/var/lib/bulksync`
//!
//! The credential passphrase is only read from `BULKSYNC_PASSPHRASE`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/bulksync.toml`.
//! This can be overridden using the `BULKSYNC_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    Config, DownloadsConfig, ServerConfig, StorageConfig, TelemetryConfig, WebhooksConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (`BULKSYNC__*`)
    /// 2. TOML file (default: `config/bulksync.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
