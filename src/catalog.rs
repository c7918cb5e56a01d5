//! Operator entry points over the catalog
//!
//! Everything an API or CLI layer needs: refreshing products from a source,
//! toggling sources, editing product schedules, skipping files, deriving a
//! file's status from its download history, and bulk-queueing pending files.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::credentials::CredentialCipher;
use crate::downloader::{DownloadError, DownloadQueue, Downloader};
use crate::ledger::{
    DownloadStatus, File, FjallStore, LedgerError, Product, Source, ids,
};
use crate::scheduler::{ScheduleError, Scheduler};
use crate::sources::{AdapterError, CredentialMap, RegistryError, SourceRegistry};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("product not found: {0}")]
    ProductNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("no downloaded copy of file {0}")]
    NotDownloaded(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(AdapterError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Status of a file derived from its latest download attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileStatus {
    Available,
    Skipped,
    Downloading,
    Downloaded,
    /// Completed once, but the local copy is gone
    Deleted,
    Failed { error: String },
    Cancelled,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Available => "available",
            FileStatus::Skipped => "skipped",
            FileStatus::Downloading => "downloading",
            FileStatus::Downloaded => "downloaded",
            FileStatus::Deleted => "deleted",
            FileStatus::Failed { .. } => "failed",
            FileStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub total_files: usize,
    pub downloaded_files: usize,
    pub pending_files: usize,
    pub active_downloads: usize,
    pub enabled_sources: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductSchedule {
    pub product_id: String,
    pub product_name: String,
    pub auto_download: bool,
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
}

/// Requested changes to a product's automation settings
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub auto_download: Option<bool>,
    pub schedule: Option<String>,
}

pub struct Catalog {
    store: Arc<FjallStore>,
    sources: Arc<SourceRegistry>,
    scheduler: Arc<Scheduler>,
    downloader: Arc<Downloader>,
    queue: DownloadQueue,
    cipher: Option<Arc<dyn CredentialCipher>>,
}

impl Catalog {
    pub fn new(
        store: Arc<FjallStore>,
        sources: Arc<SourceRegistry>,
        scheduler: Arc<Scheduler>,
        downloader: Arc<Downloader>,
        queue: DownloadQueue,
        cipher: Option<Arc<dyn CredentialCipher>>,
    ) -> Self {
        Self {
            store,
            sources,
            scheduler,
            downloader,
            queue,
            cipher,
        }
    }

    /// Fetch the source's products and upsert them. Existing products keep
    /// their operator-set auto-download flag and schedule.
    pub async fn refresh_products(&self, source_id: &str) -> Result<Vec<Product>> {
        let adapter = self.sources.get(source_id)?;
        let remote = adapter.fetch_products().await?;
        let now = Utc::now();

        let mut products = Vec::with_capacity(remote.len());
        for info in remote {
            let id = ids::product_id(source_id, &info.external_id);
            let product = match self.store.get_product(&id)? {
                Some(existing) => Product {
                    name: info.name,
                    description: info.description,
                    updated_at: now,
                    ..existing
                },
                None => Product {
                    id,
                    source_id: source_id.to_string(),
                    external_id: info.external_id,
                    name: info.name,
                    description: info.description,
                    auto_download: false,
                    schedule: info.check_schedule,
                    last_checked_at: None,
                    created_at: now,
                    updated_at: now,
                },
            };
            self.store.upsert_product(&product)?;
            products.push(product);
        }

        info!(source_id, count = products.len(), "Products refreshed");
        Ok(products)
    }

    /// Enable or disable a source, optionally with new credentials.
    ///
    /// New credentials are validated by the adapter before the source is
    /// enabled with them. Enabling refreshes products right away and starts
    /// a background sync for each of them.
    pub async fn update_source(
        &self,
        source_id: &str,
        enabled: bool,
        credentials: Option<CredentialMap>,
    ) -> Result<Source> {
        let credentials = credentials.filter(|c| !c.is_empty());
        if enabled {
            if let Some(credentials) = &credentials {
                self.sources
                    .test_credentials(source_id, credentials.clone())
                    .await
                    .map_err(|e| match e {
                        RegistryError::Adapter(e) => CatalogError::InvalidCredentials(e),
                        other => CatalogError::Registry(other),
                    })?;
            }
        }

        let source =
            self.sources
                .update_source(source_id, enabled, credentials, self.cipher.as_deref())?;

        if enabled {
            match self.refresh_products(source_id).await {
                Ok(products) => {
                    for product in &products {
                        if let Err(e) = self.scheduler.sync_now(&product.id) {
                            warn!(product_id = %product.id, error = %e, "Failed to start sync");
                        }
                    }
                }
                Err(e) => warn!(source_id, error = %e, "Failed to refresh products"),
            }
        }
        Ok(source)
    }

    /// Change auto-download and/or the schedule. The new schedule is
    /// installed before anything is persisted, so an invalid expression
    /// leaves the stored product untouched.
    pub async fn update_product_schedule(
        &self,
        product_id: &str,
        update: ScheduleUpdate,
    ) -> Result<ProductSchedule> {
        let mut product = self
            .store
            .get_product(product_id)?
            .ok_or_else(|| CatalogError::ProductNotFound(product_id.to_string()))?;
        let was_auto = product.auto_download;

        if let Some(auto_download) = update.auto_download {
            product.auto_download = auto_download;
        }
        if let Some(schedule) = update.schedule {
            product.schedule = schedule.trim().to_string();
        }

        self.scheduler.schedule_product(&product)?;

        product.updated_at = Utc::now();
        self.store.upsert_product(&product)?;

        if product.auto_download && !was_auto {
            let queued = self.download_pending(&product.id).await?;
            info!(product_id, queued, "Auto-download enabled, queued pending files");
        }

        Ok(self.schedule_entry(&product))
    }

    /// Every product with its automation settings and next fire time
    pub fn schedules(&self) -> Result<Vec<ProductSchedule>> {
        Ok(self
            .store
            .list_products()?
            .iter()
            .map(|p| self.schedule_entry(p))
            .collect())
    }

    fn schedule_entry(&self, product: &Product) -> ProductSchedule {
        ProductSchedule {
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            auto_download: product.auto_download,
            schedule: product.schedule.clone(),
            next_run: self.scheduler.next_run(&product.id),
        }
    }

    pub fn skip_file(&self, file_id: &str) -> Result<File> {
        self.set_skipped(file_id, true)
    }

    pub fn unskip_file(&self, file_id: &str) -> Result<File> {
        self.set_skipped(file_id, false)
    }

    fn set_skipped(&self, file_id: &str, skipped: bool) -> Result<File> {
        match self.store.set_file_skipped(file_id, skipped) {
            Ok(file) => Ok(file),
            Err(LedgerError::NotFound { .. }) => {
                Err(CatalogError::FileNotFound(file_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn file_status(&self, file_id: &str) -> Result<FileStatus> {
        let file = self
            .store
            .get_file(file_id)?
            .ok_or_else(|| CatalogError::FileNotFound(file_id.to_string()))?;
        self.derive_status(&file)
    }

    fn derive_status(&self, file: &File) -> Result<FileStatus> {
        let status = match self.store.latest_download(&file.id)? {
            Some(entry) => match entry.status {
                DownloadStatus::Downloading => FileStatus::Downloading,
                DownloadStatus::Completed => {
                    if !entry.local_path.is_empty() && Path::new(&entry.local_path).exists() {
                        FileStatus::Downloaded
                    } else {
                        FileStatus::Deleted
                    }
                }
                DownloadStatus::Failed => FileStatus::Failed {
                    error: entry.error_message,
                },
                DownloadStatus::Cancelled => FileStatus::Cancelled,
            },
            None if file.skipped => FileStatus::Skipped,
            None => FileStatus::Available,
        };
        Ok(status)
    }

    /// Files awaiting review: belong to an auto-download product, not
    /// skipped, and never attempted (cancelled attempts count as attempted)
    pub fn pending_files(&self) -> Result<Vec<File>> {
        let auto_products: HashSet<String> = self
            .store
            .list_products()?
            .into_iter()
            .filter(|p| p.auto_download)
            .map(|p| p.id)
            .collect();

        let mut pending = Vec::new();
        for file in self.store.list_files()? {
            if file.skipped || !auto_products.contains(&file.product_id) {
                continue;
            }
            if !self.store.has_download_history(&file.id)? {
                pending.push(file);
            }
        }
        Ok(pending)
    }

    /// Queue every non-skipped file of the product that has never completed
    pub async fn download_pending(&self, product_id: &str) -> Result<usize> {
        let mut queued = 0;
        for file in self.store.list_files_for_product(product_id)? {
            if file.skipped || self.store.has_completed_download(&file.id)? {
                continue;
            }
            self.queue.submit(&file.id).await?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Queue one file for background download
    pub async fn download_file(&self, file_id: &str) -> Result<()> {
        if !self.store.contains_file(file_id)? {
            return Err(CatalogError::FileNotFound(file_id.to_string()));
        }
        self.queue.submit(file_id).await?;
        Ok(())
    }

    pub fn cancel_download(&self, file_id: &str) -> Result<()> {
        Ok(self.downloader.cancel(file_id)?)
    }

    /// Remove the local copy of a downloaded file; its status becomes `deleted`
    pub async fn delete_local_file(&self, file_id: &str) -> Result<()> {
        let entry = self
            .store
            .list_downloads(file_id)?
            .into_iter()
            .rev()
            .find(|e| e.status == DownloadStatus::Completed && !e.local_path.is_empty())
            .ok_or_else(|| CatalogError::NotDownloaded(file_id.to_string()))?;

        match tokio::fs::remove_file(&entry.local_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(file_id, path = %entry.local_path, "Local file deleted");
        Ok(())
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let files = self.store.list_files()?;
        let mut downloaded_files = 0;
        for file in &files {
            if self.store.has_completed_download(&file.id)? {
                downloaded_files += 1;
            }
        }

        Ok(CatalogStats {
            total_files: files.len(),
            downloaded_files,
            pending_files: self.pending_files()?.len(),
            active_downloads: self.downloader.active_downloads().len(),
            enabled_sources: self
                .store
                .list_sources()?
                .iter()
                .filter(|s| s.enabled)
                .count(),
        })
    }
}
