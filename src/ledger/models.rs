//! Entities persisted in the ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered external catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    /// Encrypted credential blob, opaque to everything but the cipher
    #[serde(default)]
    pub credentials_enc: Vec<u8>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn has_credentials(&self) -> bool {
        !self.credentials_enc.is_empty()
    }
}

/// A dataset offered by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub source_id: String,
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auto_download: bool,
    /// Cron expression; empty means the product is not scheduled
    #[serde(default)]
    pub schedule: String,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_scheduled(&self) -> bool {
        !self.schedule.trim().is_empty()
    }
}

/// One release or batch of files under a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub product_id: String,
    pub external_id: String,
    pub name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One downloadable artifact within a delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub delivery_id: String,
    pub product_id: String,
    pub source_id: String,
    pub external_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub expected_checksum: String,
    #[serde(default)]
    pub checksum_algorithm: String,
    pub download_uri: String,
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skipped: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a single download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadStatus::Downloading)
    }
}

/// Append-only record of one attempt to fetch a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadEntry {
    /// Ledger-wide monotonic sequence
    pub id: u64,
    pub file_id: String,
    pub status: DownloadStatus,
    #[serde(default)]
    pub bytes_written: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub local_path: String,
    #[serde(default)]
    pub local_checksum: String,
    #[serde(default)]
    pub error_message: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Webhook listener registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: u64,
    pub name: String,
    pub url: String,
    /// Subscribed event names; `*` subscribes to everything
    pub events: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Webhook {
    /// Whether this listener wants an event with the given name
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == "*" || e == event)
    }
}

/// Fields for registering a new webhook; the ledger assigns id and timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewWebhook {
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}
