use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::error::SyncError;
use crate::downloader::DownloadQueue;
use crate::hooks::{Event, EventKind, HookDispatcher};
use crate::ledger::{Delivery, File, FjallStore, Product, ids};
use crate::observability::Metrics;
use crate::sources::{DeliveryInfo, FileInfo, SourceRegistry};

/// Outcome counters for one product sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub product_id: String,
    pub deliveries_seen: usize,
    pub new_deliveries: usize,
    pub new_files: usize,
    pub known_files: usize,
    pub failed_deliveries: usize,
    pub queued_downloads: usize,
}

/// Discovers new deliveries and files for a product and records them
pub struct SyncRunner {
    store: Arc<FjallStore>,
    sources: Arc<SourceRegistry>,
    hooks: Arc<HookDispatcher>,
    queue: DownloadQueue,
    metrics: Arc<Metrics>,
    in_progress: Mutex<HashSet<String>>,
}

impl SyncRunner {
    pub fn new(
        store: Arc<FjallStore>,
        sources: Arc<SourceRegistry>,
        hooks: Arc<HookDispatcher>,
        queue: DownloadQueue,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            sources,
            hooks,
            queue,
            metrics,
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<FjallStore> {
        &self.store
    }

    /// Run one sync for the product. Overlapping syncs of the same product
    /// are rejected with `AlreadyRunning`.
    pub async fn sync_product(&self, product_id: &str) -> Result<SyncReport, SyncError> {
        let _guard = self.claim(product_id)?;
        info!(product_id, "Starting sync");

        let Some(product) = self.store.get_product(product_id)? else {
            error!(product_id, "Product not found");
            return Err(SyncError::ProductNotFound(product_id.to_string()));
        };
        let adapter = self.sources.get(&product.source_id).map_err(|_| {
            error!(source_id = %product.source_id, "Source adapter not found");
            SyncError::SourceNotFound(product.source_id.clone())
        })?;

        let deliveries = match adapter.fetch_deliveries(&product.external_id).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!(product_id, error = %e, "Failed to fetch deliveries");
                self.metrics.sync_failed();
                self.hooks.emit(
                    Event::new(EventKind::SyncFailed, &product.source_id)
                        .with_product(&product)
                        .with_error("SYNC_ERROR", e.to_string()),
                );
                return Err(SyncError::Deliveries(e));
            }
        };

        let mut report = SyncReport {
            product_id: product_id.to_string(),
            deliveries_seen: deliveries.len(),
            ..Default::default()
        };

        for info in &deliveries {
            let files = match adapter
                .fetch_files(&product.external_id, &info.external_id)
                .await
            {
                Ok(files) => files,
                Err(e) => {
                    warn!(product_id, delivery = %info.external_id, error = %e, "Failed to fetch files");
                    report.failed_deliveries += 1;
                    continue;
                }
            };

            for file_info in &files {
                self.record_file(&product, info, file_info, &mut report).await?;
            }
        }

        let now = Utc::now();
        if let Some(mut fresh) = self.store.get_product(product_id)? {
            fresh.last_checked_at = Some(now);
            self.store.upsert_product(&fresh)?;
        }
        if let Some(mut source) = self.store.get_source(&product.source_id)? {
            source.last_sync_at = Some(now);
            self.store.upsert_source(&source)?;
        }

        self.metrics.sync_completed();
        self.hooks
            .emit(Event::new(EventKind::SyncCompleted, &product.source_id).with_product(&product));
        info!(
            product_id,
            deliveries = report.deliveries_seen,
            new_files = report.new_files,
            known_files = report.known_files,
            failed_deliveries = report.failed_deliveries,
            "Sync completed"
        );
        Ok(report)
    }

    async fn record_file(
        &self,
        product: &Product,
        info: &DeliveryInfo,
        file_info: &FileInfo,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let file_id = ids::file_id(&product.id, &info.external_id, &file_info.external_id);
        if self.store.contains_file(&file_id)? {
            report.known_files += 1;
            return Ok(());
        }

        let now = Utc::now();
        let delivery = Delivery {
            id: ids::delivery_id(&product.id, &info.external_id),
            product_id: product.id.clone(),
            external_id: info.external_id.clone(),
            name: info.name.clone(),
            published_at: info.published_at,
            expires_at: info.expires_at,
            created_at: now,
        };
        if self.store.insert_delivery_if_absent(&delivery)? {
            report.new_deliveries += 1;
        }

        let file = File {
            id: file_id,
            delivery_id: delivery.id.clone(),
            product_id: product.id.clone(),
            source_id: product.source_id.clone(),
            external_id: file_info.external_id.clone(),
            file_name: file_info.file_name.clone(),
            file_size: file_info.file_size,
            expected_checksum: file_info.checksum.clone(),
            checksum_algorithm: file_info.checksum_algorithm.clone(),
            download_uri: file_info.download_uri.clone(),
            released_at: file_info.released_at,
            skipped: false,
            created_at: now,
            updated_at: now,
        };
        if !self.store.insert_file_if_absent(&file)? {
            report.known_files += 1;
            return Ok(());
        }
        report.new_files += 1;
        debug!(file_id = %file.id, name = %file.file_name, "New file discovered");

        self.hooks.emit(
            Event::new(EventKind::FileAvailable, &product.source_id)
                .with_product(product)
                .with_delivery(&delivery)
                .with_file(&file),
        );

        if product.auto_download && !file.skipped {
            match self.queue.submit(&file.id).await {
                Ok(()) => report.queued_downloads += 1,
                Err(e) => warn!(file_id = %file.id, error = %e, "Failed to queue auto-download"),
            }
        }
        Ok(())
    }

    fn claim(&self, product_id: &str) -> Result<SyncGuard<'_>, SyncError> {
        let mut running = self.in_progress.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(product_id.to_string()) {
            debug!(product_id, "Sync already running, skipping");
            return Err(SyncError::AlreadyRunning(product_id.to_string()));
        }
        Ok(SyncGuard {
            running: &self.in_progress,
            product_id: product_id.to_string(),
        })
    }
}

struct SyncGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    product_id: String,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.product_id);
    }
}
