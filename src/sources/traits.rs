use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use super::types::{CredentialField, CredentialMap, DeliveryInfo, FileInfo, ProductInfo};

/// Adapter errors
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("remote object not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("download cancelled")]
    Cancelled,
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Auth(_) => "AUTH_ERROR",
            AdapterError::NotFound(_) => "NOT_FOUND",
            AdapterError::RateLimited(_) => "RATE_LIMITED",
            AdapterError::Network(_) => "NETWORK_ERROR",
            AdapterError::InvalidConfig(_) => "INVALID_CONFIG",
            AdapterError::Cancelled => "CANCELLED",
            AdapterError::Io(_) => "IO_ERROR",
        }
    }
}

/// One adapter per external catalog, registered by identifier.
///
/// Adapters own the remote protocol and the plaintext credentials. The
/// engine only drives them: enumerate products, deliveries and files, then
/// stream a file into the sink it provides.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier, also the source id in the ledger
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn credential_fields(&self) -> Vec<CredentialField> {
        Vec::new()
    }

    fn set_credentials(&self, credentials: CredentialMap);

    async fn validate_credentials(&self) -> Result<(), AdapterError>;

    async fn fetch_products(&self) -> Result<Vec<ProductInfo>, AdapterError>;

    async fn fetch_deliveries(
        &self,
        product_external_id: &str,
    ) -> Result<Vec<DeliveryInfo>, AdapterError>;

    async fn fetch_files(
        &self,
        product_external_id: &str,
        delivery_external_id: &str,
    ) -> Result<Vec<FileInfo>, AdapterError>;

    /// Stream the file into `sink`, reporting `(bytes_written, total_bytes)`
    /// through `progress`. Must return promptly once `cancel` fires.
    async fn download_file(
        &self,
        file: &FileInfo,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &mut (dyn FnMut(u64, u64) + Send),
        cancel: &CancellationToken,
    ) -> Result<(), AdapterError>;
}
