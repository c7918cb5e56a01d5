/// Fjall-based persistence layer for the sync catalog
///
/// This module provides durable storage for every entity the download and
/// sync engine touches. It uses Fjall (an embedded LSM key-value store) to
/// persist:
///
/// - Sources (enabled flag, encrypted credential blob)
/// - Products, deliveries and files discovered from remote catalogs
/// - Download history (one append-only entry per attempt)
/// - Webhook registrations
/// - Metadata (sequence counters)
///
/// ## Identity
///
/// Product, delivery and file ids are derived from external ids (see
/// [`ids`]), so re-discovering the same remote file maps onto the same key.
/// `insert_*_if_absent` make creation idempotent.
///
/// ## Usage
///
/// ```rust,ignore
/// use bulksync::ledger::FjallStore;
///
/// let store = FjallStore::open("data/ledger")?;
/// let entry = store.create_download("epo:14:2024-01:a.zip")?;
/// let latest = store.latest_download(&entry.file_id)?;
/// ```

pub mod error;
pub mod ids;
pub mod models;
pub mod partitions;
pub mod store;

pub use error::{LedgerError, Result};
pub use models::{
    Delivery, DownloadEntry, DownloadStatus, File, NewWebhook, Product, Source, Webhook,
};
pub use store::{FjallStore, StoreStats};
