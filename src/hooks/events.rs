use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ledger::{Delivery, File, Product};

/// Wildcard subscription matching every event kind
pub const WILDCARD: &str = "*";

/// Lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "file.available")]
    FileAvailable,
    #[serde(rename = "download.started")]
    DownloadStarted,
    #[serde(rename = "download.completed")]
    DownloadCompleted,
    #[serde(rename = "download.failed")]
    DownloadFailed,
    #[serde(rename = "download.cancelled")]
    DownloadCancelled,
    #[serde(rename = "checksum.mismatch")]
    ChecksumMismatch,
    #[serde(rename = "sync.completed")]
    SyncCompleted,
    #[serde(rename = "sync.failed")]
    SyncFailed,
}

pub const ALL_EVENTS: [EventKind; 8] = [
    EventKind::FileAvailable,
    EventKind::DownloadStarted,
    EventKind::DownloadCompleted,
    EventKind::DownloadFailed,
    EventKind::DownloadCancelled,
    EventKind::ChecksumMismatch,
    EventKind::SyncCompleted,
    EventKind::SyncFailed,
];

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FileAvailable => "file.available",
            EventKind::DownloadStarted => "download.started",
            EventKind::DownloadCompleted => "download.completed",
            EventKind::DownloadFailed => "download.failed",
            EventKind::DownloadCancelled => "download.cancelled",
            EventKind::ChecksumMismatch => "checksum.mismatch",
            EventKind::SyncCompleted => "sync.completed",
            EventKind::SyncFailed => "sync.failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        ALL_EVENTS
            .iter()
            .copied()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| format!("unknown event '{}'", s))
    }
}

/// Whether `name` is a known event kind or the wildcard (case-insensitive)
pub fn is_valid_event(name: &str) -> bool {
    name.trim() == WILDCARD || name.parse::<EventKind>().is_ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// JSON envelope delivered to webhook listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Event {
    pub fn new(kind: EventKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            source: source.into(),
            product: None,
            delivery: None,
            file: None,
            alerts: Vec::new(),
            error: None,
        }
    }

    pub fn with_product(mut self, product: &Product) -> Self {
        self.product = Some(ProductRef {
            id: product.id.clone(),
            name: product.name.clone(),
        });
        self
    }

    pub fn with_delivery(mut self, delivery: &Delivery) -> Self {
        self.delivery = Some(DeliveryRef {
            id: delivery.id.clone(),
            name: delivery.name.clone(),
        });
        self
    }

    pub fn with_file(mut self, file: &File) -> Self {
        self.file = Some(FileRef {
            id: file.id.clone(),
            name: file.file_name.clone(),
            size: file.file_size,
            checksum: None,
            local_path: None,
        });
        self
    }

    /// Attach the on-disk result to the file part; a no-op without `with_file`
    pub fn with_local_result(mut self, size: u64, checksum: &str, local_path: &str) -> Self {
        if let Some(file) = self.file.as_mut() {
            file.size = size;
            file.checksum = Some(checksum.to_string());
            file.local_path = Some(local_path.to_string());
        }
        self
    }

    pub fn with_alert(mut self, alert: impl Into<String>) -> Self {
        self.alerts.push(alert.into());
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorInfo {
            code: code.into(),
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_validation() {
        assert!(is_valid_event("*"));
        assert!(is_valid_event("download.completed"));
        assert!(is_valid_event("Download.Completed"));
        assert!(is_valid_event("checksum.mismatch"));
        assert!(!is_valid_event("download.exploded"));
        assert!(!is_valid_event(""));
    }

    #[test]
    fn test_envelope_omits_absent_parts() {
        let event = Event::new(EventKind::SyncCompleted, "epo");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "sync.completed");
        assert_eq!(json["source"], "epo");
        assert!(json.get("product").is_none());
        assert!(json.get("file").is_none());
        assert!(json.get("alerts").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_envelope_with_error_and_alert() {
        let event = Event::new(EventKind::DownloadFailed, "epo")
            .with_alert("disk almost full")
            .with_error("NETWORK_ERROR", "connection reset");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "download.failed");
        assert_eq!(json["alerts"][0], "disk almost full");
        assert_eq!(json["error"]["code"], "NETWORK_ERROR");
        assert_eq!(json["error"]["message"], "connection reset");
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in ALL_EVENTS {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }
}
