use thiserror::Error;

use crate::ledger::LedgerError;
use crate::sources::AdapterError;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download already in progress for file {0}")]
    AlreadyInProgress(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("no adapter registered for source {0}")]
    SourceNotFound(String),

    #[error("no active download for file {0}")]
    NotActive(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("download timed out")]
    TimedOut,

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("ledger error: {0}")]
    Store(#[from] LedgerError),

    #[error("download queue closed")]
    Closed,
}

impl DownloadError {
    /// Stable code carried in event payloads
    pub fn code(&self) -> &'static str {
        match self {
            DownloadError::AlreadyInProgress(_) => "ALREADY_IN_PROGRESS",
            DownloadError::FileNotFound(_)
            | DownloadError::SourceNotFound(_)
            | DownloadError::NotActive(_) => "NOT_FOUND",
            DownloadError::Cancelled => "CANCELLED",
            DownloadError::TimedOut => "TIMEOUT",
            DownloadError::Adapter(e) => e.code(),
            DownloadError::Filesystem(_) => "FILESYSTEM_ERROR",
            DownloadError::Store(_) => "STORE_ERROR",
            DownloadError::Closed => "QUEUE_CLOSED",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DownloadError::FileNotFound(_)
                | DownloadError::SourceNotFound(_)
                | DownloadError::NotActive(_)
        )
    }

    /// Cancellation and timeout both end an attempt as "cancelled"
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            DownloadError::Cancelled
                | DownloadError::TimedOut
                | DownloadError::Adapter(AdapterError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
