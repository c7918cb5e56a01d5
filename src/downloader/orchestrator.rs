use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{DownloadError, Result};
use super::hashing::{HashingWriter, verify_checksum};
use super::progress::{DownloadProgress, ProgressTracker};
use crate::hooks::{Event, EventKind, HookDispatcher};
use crate::humanize::{format_bytes, format_rate};
use crate::ledger::{DownloadEntry, DownloadStatus, File, FjallStore, Product};
use crate::observability::Metrics;
use crate::sources::{AdapterError, FileInfo, SourceAdapter, SourceRegistry};

const TMP_SUFFIX: &str = ".tmp";
const FEED_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Downloads root; files land at `<root>/<source>/<product>/<name>`
    pub root: PathBuf,
    pub max_concurrent: usize,
    /// Absolute wall-clock limit per download, slot wait included
    pub timeout: Duration,
    pub progress_persist_interval: Duration,
}

impl DownloadSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_concurrent: 3,
            timeout: Duration::from_secs(3600),
            progress_persist_interval: Duration::from_secs(1),
        }
    }
}

/// Bounded-concurrency, cancellable, checksum-computing file transfers
pub struct Downloader {
    store: Arc<FjallStore>,
    sources: Arc<SourceRegistry>,
    hooks: Arc<HookDispatcher>,
    metrics: Arc<Metrics>,
    settings: DownloadSettings,
    slots: Arc<Semaphore>,
    progress: Arc<ProgressTracker>,
    active: Arc<DashMap<String, CancellationToken>>,
}

impl Downloader {
    pub fn new(
        store: Arc<FjallStore>,
        sources: Arc<SourceRegistry>,
        hooks: Arc<HookDispatcher>,
        metrics: Arc<Metrics>,
        settings: DownloadSettings,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            store,
            sources,
            hooks,
            metrics,
            settings,
            slots,
            progress: Arc::new(ProgressTracker::new()),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Run one transfer for `file_id` to completion.
    ///
    /// Returns the terminal `completed` entry. Every attempt that gets past
    /// the slot wait records a terminal entry and emits a terminal event.
    pub async fn download(&self, file_id: &str) -> Result<DownloadEntry> {
        let token = CancellationToken::new();
        match self.active.entry(file_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(DownloadError::AlreadyInProgress(file_id.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        let _in_flight = InFlight {
            active: self.active.clone(),
            progress: self.progress.clone(),
            file_id: file_id.to_string(),
            token: token.clone(),
        };
        let scope = CancelScope::new(token, self.settings.timeout);

        let file = self
            .store
            .get_file(file_id)?
            .ok_or_else(|| DownloadError::FileNotFound(file_id.to_string()))?;
        let adapter = self
            .sources
            .get(&file.source_id)
            .map_err(|_| DownloadError::SourceNotFound(file.source_id.clone()))?;

        let _permit = tokio::select! {
            permit = self.slots.clone().acquire_owned() => {
                permit.map_err(|_| DownloadError::Closed)?
            }
            interrupt = scope.done() => {
                debug!(file_id, "Interrupted while waiting for a download slot");
                return Err(interrupt.into());
            }
        };

        self.transfer(&file, adapter.as_ref(), &scope).await
    }

    async fn transfer(
        &self,
        file: &File,
        adapter: &dyn SourceAdapter,
        scope: &CancelScope,
    ) -> Result<DownloadEntry> {
        let mut entry = self.store.create_download(&file.id)?;
        let product = self.store.get_product(&file.product_id).ok().flatten();

        self.metrics.download_started();
        info!(file_id = %file.id, entry_id = entry.id, name = %file.file_name, "Download started");
        self.hooks
            .emit(self.file_event(EventKind::DownloadStarted, file, product.as_ref()));

        let result = self.stream_to_disk(file, adapter, scope, &mut entry).await;
        let now = Utc::now();

        match result {
            Ok(finished) => {
                entry.status = DownloadStatus::Completed;
                entry.bytes_written = finished.bytes;
                entry.total_bytes = finished.bytes.max(file.file_size);
                entry.local_checksum = finished.checksum.clone();
                entry.completed_at = Some(now);
                if let Err(e) = self.store.update_download(&entry) {
                    warn!(file_id = %file.id, error = %e, "Failed to record download outcome");
                }

                let elapsed = (now - entry.started_at).to_std().unwrap_or_default();
                self.metrics.download_completed();
                info!(
                    file_id = %file.id,
                    size = %format_bytes(finished.bytes),
                    rate = %format_rate(finished.bytes, elapsed),
                    checksum = %finished.checksum,
                    "Download completed"
                );

                let local_path = finished.path.display().to_string();
                let mut event = self
                    .file_event(EventKind::DownloadCompleted, file, product.as_ref())
                    .with_local_result(finished.bytes, &finished.checksum, &local_path);

                match verify_checksum(
                    &finished.checksum,
                    &file.expected_checksum,
                    &file.checksum_algorithm,
                ) {
                    Some(false) => {
                        let alert = format!(
                            "checksum mismatch: expected {}, got {}",
                            file.expected_checksum, finished.checksum
                        );
                        warn!(file_id = %file.id, %alert, "Checksum verification failed");
                        event = event.with_alert(alert.clone());
                        self.hooks.emit(
                            self.file_event(EventKind::ChecksumMismatch, file, product.as_ref())
                                .with_local_result(finished.bytes, &finished.checksum, &local_path)
                                .with_error("CHECKSUM_MISMATCH", alert),
                        );
                    }
                    Some(true) => debug!(file_id = %file.id, "Checksum verified"),
                    None => debug!(
                        file_id = %file.id,
                        algorithm = %file.checksum_algorithm,
                        "Checksum not verifiable"
                    ),
                }

                self.hooks.emit(event);
                Ok(entry)
            }
            Err(err) => {
                let (status, kind) = if err.is_cancellation() {
                    self.metrics.download_cancelled();
                    (DownloadStatus::Cancelled, EventKind::DownloadCancelled)
                } else {
                    self.metrics.download_failed();
                    (DownloadStatus::Failed, EventKind::DownloadFailed)
                };
                warn!(file_id = %file.id, status = status.as_str(), error = %err, "Download ended");

                entry.status = status;
                entry.error_message = err.to_string();
                entry.completed_at = Some(now);
                if let Err(e) = self.store.update_download(&entry) {
                    warn!(file_id = %file.id, error = %e, "Failed to record download outcome");
                }

                self.hooks.emit(
                    self.file_event(kind, file, product.as_ref())
                        .with_error(err.code(), err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// Resolve paths, stream into the temp file, then rename into place.
    /// The temp file never survives an error.
    async fn stream_to_disk(
        &self,
        file: &File,
        adapter: &dyn SourceAdapter,
        scope: &CancelScope,
        entry: &mut DownloadEntry,
    ) -> Result<Finished> {
        let final_path = self.destination(file)?;
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = tmp_path_for(&final_path);

        entry.local_path = final_path.display().to_string();
        entry.total_bytes = file.file_size;
        if let Err(e) = self.store.update_download(entry) {
            warn!(file_id = %file.id, error = %e, "Failed to persist download path");
        }

        let result = self.write_temp(file, adapter, scope, entry, &tmp_path).await;
        let result = match result {
            Ok((checksum, bytes)) => tokio::fs::rename(&tmp_path, &final_path)
                .await
                .map(|_| Finished {
                    path: final_path,
                    checksum,
                    bytes,
                })
                .map_err(DownloadError::from),
            Err(e) => Err(e),
        };

        if result.is_err() {
            match tokio::fs::remove_file(&tmp_path).await {
                Ok(()) => debug!(path = %tmp_path.display(), "Removed partial download"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %tmp_path.display(), error = %e, "Failed to remove partial download"),
            }
        }
        result
    }

    /// Stream the adapter into `tmp_path`. The last reported byte counts are
    /// copied onto `entry` whether or not the transfer succeeds.
    async fn write_temp(
        &self,
        file: &File,
        adapter: &dyn SourceAdapter,
        scope: &CancelScope,
        entry: &mut DownloadEntry,
        tmp_path: &Path,
    ) -> Result<(String, u64)> {
        let out = tokio::fs::File::create(tmp_path).await?;
        let mut writer = HashingWriter::new(out);
        let descriptor = FileInfo::from(file);

        self.progress.start(&file.id, &file.file_name, file.file_size);

        let (persist_tx, persister) = self.spawn_progress_persister(entry.clone());
        let tracker = &self.progress;
        let interval = self.settings.progress_persist_interval;
        let mut persisted_at = Instant::now();
        let mut reported = (entry.bytes_written, entry.total_bytes);

        let outcome = {
            let mut on_progress = |written: u64, total: u64| {
                tracker.update(&file.id, written, total);
                reported = (written, total);
                if persisted_at.elapsed() < interval {
                    return;
                }
                persisted_at = Instant::now();
                persist_tx.send_modify(|snapshot| {
                    snapshot.bytes_written = written;
                    if total > 0 {
                        snapshot.total_bytes = total;
                    }
                });
            };

            tokio::select! {
                res = adapter.download_file(&descriptor, &mut writer, &mut on_progress, scope.token()) => {
                    res.map_err(|e| scope.classify(e))
                }
                interrupt = scope.done() => Err(interrupt.into()),
            }
        };
        if let Err(DownloadError::TimedOut) = outcome {
            scope.token().cancel();
        }

        // Drain pending progress writes so the caller's terminal update lands last
        drop(persist_tx);
        if let Err(e) = persister.await {
            warn!(file_id = %file.id, error = %e, "Progress persister stopped abnormally");
        }
        entry.bytes_written = reported.0;
        if reported.1 > 0 {
            entry.total_bytes = reported.1;
        }
        outcome?;

        writer.flush().await?;
        writer.get_mut().sync_all().await?;
        let (checksum, bytes, _) = writer.finish();
        Ok((checksum, bytes))
    }

    /// Background writer for throttled progress snapshots. Only the newest
    /// snapshot is kept; the ledger write runs on the blocking pool.
    fn spawn_progress_persister(
        &self,
        entry: DownloadEntry,
    ) -> (watch::Sender<DownloadEntry>, JoinHandle<()>) {
        let (tx, mut rx) = watch::channel(entry);
        let store = self.store.clone();

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                let file_id = snapshot.file_id.clone();
                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.update_download(&snapshot)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%file_id, error = %e, "Failed to persist progress"),
                    Err(e) => warn!(%file_id, error = %e, "Progress write task panicked"),
                }
            }
        });
        (tx, handle)
    }

    /// Trigger cancellation of an active download; does not wait for it
    pub fn cancel(&self, file_id: &str) -> Result<()> {
        let token = self
            .active
            .get(file_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| DownloadError::NotActive(file_id.to_string()))?;
        token.cancel();
        info!(file_id, "Download cancellation requested");
        Ok(())
    }

    /// Snapshot of transfers that hold a slot and are streaming
    pub fn active_downloads(&self) -> Vec<DownloadProgress> {
        self.progress.get_all()
    }

    pub fn get_progress(&self, file_id: &str) -> Option<DownloadProgress> {
        self.progress.get(file_id)
    }

    /// Accepted transfers, including those still waiting for a slot
    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    pub fn is_in_flight(&self, file_id: &str) -> bool {
        self.active.contains_key(file_id)
    }

    /// Push a snapshot of active downloads every `interval` until every
    /// receiver is dropped
    pub fn progress_feed(&self, interval: Duration) -> broadcast::Receiver<Vec<DownloadProgress>> {
        let (tx, rx) = broadcast::channel(FEED_CAPACITY);
        let tracker = self.progress.clone();
        let period = interval.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if tx.send(tracker.get_all()).is_err() {
                    debug!("Progress feed has no subscribers, stopping");
                    break;
                }
            }
        });
        rx
    }

    /// Final on-disk location for a file
    pub fn destination(&self, file: &File) -> Result<PathBuf> {
        let name = Path::new(&file.file_name)
            .file_name()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("unusable file name '{}'", file.file_name),
                )
            })?;
        Ok(self
            .settings
            .root
            .join(&file.source_id)
            .join(&file.product_id)
            .join(name))
    }

    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    fn file_event(&self, kind: EventKind, file: &File, product: Option<&Product>) -> Event {
        let mut event = Event::new(kind, &file.source_id).with_file(file);
        if let Some(product) = product {
            event = event.with_product(product);
        }
        if let Ok(Some(delivery)) = self.store.get_delivery(&file.delivery_id) {
            event = event.with_delivery(&delivery);
        }
        event
    }
}

fn tmp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

struct Finished {
    path: PathBuf,
    checksum: String,
    bytes: u64,
}

/// Removes the in-flight registration on every exit path
struct InFlight {
    active: Arc<DashMap<String, CancellationToken>>,
    progress: Arc<ProgressTracker>,
    file_id: String,
    token: CancellationToken,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.token.cancel();
        self.active.remove(&self.file_id);
        self.progress.complete(&self.file_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    TimedOut,
}

impl From<Interrupt> for DownloadError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => DownloadError::Cancelled,
            Interrupt::TimedOut => DownloadError::TimedOut,
        }
    }
}

/// Cancellation token bounded by an absolute deadline
struct CancelScope {
    token: CancellationToken,
    deadline: tokio::time::Instant,
}

impl CancelScope {
    fn new(token: CancellationToken, timeout: Duration) -> Self {
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365));
        Self { token, deadline }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves when the token fires or the deadline passes
    async fn done(&self) -> Interrupt {
        tokio::select! {
            _ = self.token.cancelled() => Interrupt::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => Interrupt::TimedOut,
        }
    }

    /// Adapters often surface cancellation as an ordinary error
    fn classify(&self, err: AdapterError) -> DownloadError {
        if self.token.is_cancelled() || matches!(err, AdapterError::Cancelled) {
            DownloadError::Cancelled
        } else if tokio::time::Instant::now() >= self.deadline {
            DownloadError::TimedOut
        } else {
            DownloadError::Adapter(err)
        }
    }
}
