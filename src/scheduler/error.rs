use thiserror::Error;

use crate::ledger::LedgerError;
use crate::sources::AdapterError;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("product not found: {0}")]
    ProductNotFound(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("product not found: {0}")]
    ProductNotFound(String),

    #[error("no adapter registered for source {0}")]
    SourceNotFound(String),

    #[error("sync already running for product {0}")]
    AlreadyRunning(String),

    #[error("delivery enumeration failed: {0}")]
    Deliveries(#[from] AdapterError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
