use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ledger::File;

/// Plaintext credentials handed to an adapter (field key -> value)
pub type CredentialMap = BTreeMap<String, String>;

/// Describes one credential input an adapter expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialField {
    pub key: String,
    pub label: String,
    /// "text" or "password"
    pub kind: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
}

/// Product metadata from a remote catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default cron schedule suggested by the source
    #[serde(default)]
    pub check_schedule: String,
}

/// Delivery (release/batch) metadata from a remote catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub external_id: String,
    pub name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DeliveryInfo {
    /// Implicit single delivery for sources with no native delivery concept
    pub fn implicit(product_external_id: &str) -> Self {
        Self {
            external_id: "current".to_string(),
            name: product_external_id.to_string(),
            published_at: None,
            expires_at: None,
        }
    }
}

/// File metadata from a remote catalog, also the descriptor passed to
/// `download_file`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub external_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub checksum_algorithm: String,
    pub download_uri: String,
    pub released_at: Option<DateTime<Utc>>,
}

impl From<&File> for FileInfo {
    fn from(file: &File) -> Self {
        Self {
            external_id: file.external_id.clone(),
            file_name: file.file_name.clone(),
            file_size: file.file_size,
            checksum: file.expected_checksum.clone(),
            checksum_algorithm: file.checksum_algorithm.clone(),
            download_uri: file.download_uri.clone(),
            released_at: file.released_at,
        }
    }
}

/// Adapter identity merged with its persisted source state
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub has_credentials: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub credential_fields: Vec<CredentialField>,
}
