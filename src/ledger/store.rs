use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::error::{LedgerError, Result};
use super::models::{
    Delivery, DownloadEntry, DownloadStatus, File, NewWebhook, Product, Source, Webhook,
};
use super::partitions::{
    decode_download_key, encode_delivery_key, encode_download_key, encode_download_prefix,
    encode_file_key, encode_meta_key, encode_product_key, encode_source_key, encode_webhook_key,
};

const DOWNLOAD_SEQ_KEY: &str = "next_download_seq";
const WEBHOOK_SEQ_KEY: &str = "next_webhook_seq";

/// Fjall-backed persistent storage for sources, catalog entities, download
/// history and webhook registrations
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    sources: PartitionHandle,
    products: PartitionHandle,
    deliveries: PartitionHandle,
    files: PartitionHandle,
    downloads: PartitionHandle,
    webhooks: PartitionHandle,
    metadata: PartitionHandle,
    download_seq: Arc<AtomicU64>,
    webhook_seq: Arc<AtomicU64>,
    /// Serializes check-then-insert sequences
    create_lock: Arc<Mutex<()>>,
    /// Held while claiming an id and persisting the advanced counter
    seq_lock: Arc<Mutex<()>>,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let sources = keyspace.open_partition("sources", PartitionCreateOptions::default())?;
        let products = keyspace.open_partition("products", PartitionCreateOptions::default())?;
        let deliveries =
            keyspace.open_partition("deliveries", PartitionCreateOptions::default())?;
        let files = keyspace.open_partition("files", PartitionCreateOptions::default())?;
        let downloads = keyspace.open_partition("downloads", PartitionCreateOptions::default())?;
        let webhooks = keyspace.open_partition("webhooks", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        // Never hand out an id at or below one already stored, whatever the
        // persisted counter says
        let download_seq =
            load_counter(&metadata, DOWNLOAD_SEQ_KEY)?.max(next_download_seq(&downloads)?);
        let webhook_seq =
            load_counter(&metadata, WEBHOOK_SEQ_KEY)?.max(last_webhook_id(&webhooks)?);

        info!(download_seq, webhook_seq, "Fjall store opened successfully");
        Ok(Self {
            keyspace,
            sources,
            products,
            deliveries,
            files,
            downloads,
            webhooks,
            metadata,
            download_seq: Arc::new(AtomicU64::new(download_seq)),
            webhook_seq: Arc::new(AtomicU64::new(webhook_seq)),
            create_lock: Arc::new(Mutex::new(())),
            seq_lock: Arc::new(Mutex::new(())),
        })
    }

    // Sources

    pub fn upsert_source(&self, source: &Source) -> Result<()> {
        put_json(&self.sources, encode_source_key(&source.id), source)?;
        debug!(source_id = %source.id, "Upserted source");
        Ok(())
    }

    pub fn get_source(&self, id: &str) -> Result<Option<Source>> {
        get_json(&self.sources, encode_source_key(id))
    }

    pub fn list_sources(&self) -> Result<Vec<Source>> {
        scan_json(&self.sources)
    }

    // Products

    pub fn upsert_product(&self, product: &Product) -> Result<()> {
        put_json(&self.products, encode_product_key(&product.id), product)?;
        debug!(product_id = %product.id, "Upserted product");
        Ok(())
    }

    pub fn get_product(&self, id: &str) -> Result<Option<Product>> {
        get_json(&self.products, encode_product_key(id))
    }

    pub fn list_products(&self) -> Result<Vec<Product>> {
        scan_json(&self.products)
    }

    pub fn list_products_for_source(&self, source_id: &str) -> Result<Vec<Product>> {
        Ok(self
            .list_products()?
            .into_iter()
            .filter(|p| p.source_id == source_id)
            .collect())
    }

    /// Auto-download products with a non-empty schedule expression
    pub fn scheduled_products(&self) -> Result<Vec<Product>> {
        Ok(self
            .list_products()?
            .into_iter()
            .filter(|p| p.auto_download && p.is_scheduled())
            .collect())
    }

    // Deliveries

    /// Insert the delivery unless one with the same id exists; returns whether
    /// a new record was written
    pub fn insert_delivery_if_absent(&self, delivery: &Delivery) -> Result<bool> {
        let _guard = self.create_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = encode_delivery_key(&delivery.id);
        if self.deliveries.contains_key(&key)? {
            return Ok(false);
        }
        put_json(&self.deliveries, key, delivery)?;
        debug!(delivery_id = %delivery.id, "Created delivery");
        Ok(true)
    }

    pub fn get_delivery(&self, id: &str) -> Result<Option<Delivery>> {
        get_json(&self.deliveries, encode_delivery_key(id))
    }

    pub fn list_deliveries(&self, product_id: &str) -> Result<Vec<Delivery>> {
        Ok(scan_json::<Delivery>(&self.deliveries)?
            .into_iter()
            .filter(|d| d.product_id == product_id)
            .collect())
    }

    // Files

    /// Insert the file unless one with the same id exists; returns whether a
    /// new record was written
    pub fn insert_file_if_absent(&self, file: &File) -> Result<bool> {
        let _guard = self.create_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = encode_file_key(&file.id);
        if self.files.contains_key(&key)? {
            return Ok(false);
        }
        put_json(&self.files, key, file)?;
        debug!(file_id = %file.id, "Created file");
        Ok(true)
    }

    pub fn contains_file(&self, id: &str) -> Result<bool> {
        Ok(self.files.contains_key(encode_file_key(id))?)
    }

    pub fn get_file(&self, id: &str) -> Result<Option<File>> {
        get_json(&self.files, encode_file_key(id))
    }

    pub fn list_files(&self) -> Result<Vec<File>> {
        scan_json(&self.files)
    }

    pub fn list_files_for_product(&self, product_id: &str) -> Result<Vec<File>> {
        Ok(self
            .list_files()?
            .into_iter()
            .filter(|f| f.product_id == product_id)
            .collect())
    }

    /// Flip the skipped flag on an existing file
    pub fn set_file_skipped(&self, id: &str, skipped: bool) -> Result<File> {
        let mut file = self.get_file(id)?.ok_or_else(|| LedgerError::NotFound {
            kind: "file",
            id: id.to_string(),
        })?;
        file.skipped = skipped;
        file.updated_at = Utc::now();
        put_json(&self.files, encode_file_key(id), &file)?;
        Ok(file)
    }

    // Download history

    /// Append a new attempt in `downloading` state
    pub fn create_download(&self, file_id: &str) -> Result<DownloadEntry> {
        let _guard = self.seq_lock.lock().unwrap_or_else(|e| e.into_inner());
        let seq = self.download_seq.fetch_add(1, Ordering::SeqCst);
        let entry = DownloadEntry {
            id: seq,
            file_id: file_id.to_string(),
            status: DownloadStatus::Downloading,
            bytes_written: 0,
            total_bytes: 0,
            local_path: String::new(),
            local_checksum: String::new(),
            error_message: String::new(),
            started_at: Utc::now(),
            completed_at: None,
        };

        put_json(&self.downloads, encode_download_key(file_id, seq), &entry)?;
        self.metadata
            .insert(encode_meta_key(DOWNLOAD_SEQ_KEY), (seq + 1).to_be_bytes())?;

        debug!(seq, file_id, "Download entry created");
        Ok(entry)
    }

    /// Overwrite an existing attempt (progress counters or terminal state)
    pub fn update_download(&self, entry: &DownloadEntry) -> Result<()> {
        put_json(
            &self.downloads,
            encode_download_key(&entry.file_id, entry.id),
            entry,
        )
    }

    /// Most recent attempt for a file
    pub fn latest_download(&self, file_id: &str) -> Result<Option<DownloadEntry>> {
        match self
            .downloads
            .prefix(encode_download_prefix(file_id))
            .next_back()
        {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(serde_json::from_slice(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Full attempt history for a file, oldest first
    pub fn list_downloads(&self, file_id: &str) -> Result<Vec<DownloadEntry>> {
        let mut entries = Vec::new();
        for item in self.downloads.prefix(encode_download_prefix(file_id)) {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    pub fn has_download_history(&self, file_id: &str) -> Result<bool> {
        match self
            .downloads
            .prefix(encode_download_prefix(file_id))
            .next()
        {
            Some(item) => {
                item?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn has_completed_download(&self, file_id: &str) -> Result<bool> {
        Ok(self
            .list_downloads(file_id)?
            .iter()
            .any(|e| e.status == DownloadStatus::Completed))
    }

    // Webhooks

    pub fn create_webhook(&self, new: NewWebhook) -> Result<Webhook> {
        let _guard = self.seq_lock.lock().unwrap_or_else(|e| e.into_inner());
        let id = self.webhook_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let webhook = Webhook {
            id,
            name: new.name,
            url: new.url,
            events: new.events,
            headers: new.headers,
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        put_json(&self.webhooks, encode_webhook_key(id), &webhook)?;
        self.metadata
            .insert(encode_meta_key(WEBHOOK_SEQ_KEY), id.to_be_bytes())?;

        debug!(webhook_id = id, name = %webhook.name, "Webhook created");
        Ok(webhook)
    }

    pub fn update_webhook(&self, webhook: &Webhook) -> Result<()> {
        let key = encode_webhook_key(webhook.id);
        if !self.webhooks.contains_key(&key)? {
            return Err(LedgerError::NotFound {
                kind: "webhook",
                id: webhook.id.to_string(),
            });
        }
        put_json(&self.webhooks, key, webhook)
    }

    pub fn delete_webhook(&self, id: u64) -> Result<bool> {
        let key = encode_webhook_key(id);
        if !self.webhooks.contains_key(&key)? {
            return Ok(false);
        }
        self.webhooks.remove(key)?;
        Ok(true)
    }

    pub fn get_webhook(&self, id: u64) -> Result<Option<Webhook>> {
        get_json(&self.webhooks, encode_webhook_key(id))
    }

    pub fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        scan_json(&self.webhooks)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            source_count: count(&self.sources)?,
            product_count: count(&self.products)?,
            delivery_count: count(&self.deliveries)?,
            file_count: count(&self.files)?,
            download_count: count(&self.downloads)?,
            webhook_count: count(&self.webhooks)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub source_count: usize,
    pub product_count: usize,
    pub delivery_count: usize,
    pub file_count: usize,
    pub download_count: usize,
    pub webhook_count: usize,
}

fn load_counter(metadata: &PartitionHandle, key: &str) -> Result<u64> {
    match metadata.get(encode_meta_key(key))? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_ref()
                .try_into()
                .map_err(|_| LedgerError::InvalidKey(format!("corrupt counter '{}'", key)))?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

/// One past the highest sequence number among stored download keys
fn next_download_seq(downloads: &PartitionHandle) -> Result<u64> {
    let mut next = 0;
    for item in downloads.iter() {
        let (key, _) = item?;
        if let Some((_, seq)) = decode_download_key(&key) {
            next = next.max(seq + 1);
        }
    }
    Ok(next)
}

fn last_webhook_id(webhooks: &PartitionHandle) -> Result<u64> {
    let stored: Vec<Webhook> = scan_json(webhooks)?;
    Ok(stored.iter().map(|w| w.id).max().unwrap_or(0))
}

fn put_json<T: Serialize>(partition: &PartitionHandle, key: Vec<u8>, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    partition.insert(key, bytes)?;
    Ok(())
}

fn get_json<T: DeserializeOwned>(partition: &PartitionHandle, key: Vec<u8>) -> Result<Option<T>> {
    match partition.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
        None => Ok(None),
    }
}

fn scan_json<T: DeserializeOwned>(partition: &PartitionHandle) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for item in partition.iter() {
        let (_, value) = item?;
        items.push(serde_json::from_slice(&value)?);
    }
    Ok(items)
}

fn count(partition: &PartitionHandle) -> Result<usize> {
    let mut total = 0;
    for item in partition.iter() {
        item?;
        total += 1;
    }
    Ok(total)
}
