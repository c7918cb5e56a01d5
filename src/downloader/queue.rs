use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::{DownloadError, Result};
use super::orchestrator::Downloader;

/// Fire-and-forget submission channel for background downloads.
///
/// Submitters only learn whether the file id was accepted onto the channel.
/// A dispatcher task drains it and starts one transfer per id; outcomes are
/// logged, never returned.
#[derive(Clone)]
pub struct DownloadQueue {
    tx: mpsc::Sender<String>,
}

impl DownloadQueue {
    pub fn start(downloader: Arc<Downloader>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(dispatch(rx, downloader));
        info!(capacity, "Download queue started");
        Self { tx }
    }

    /// Waits for channel space when full
    pub async fn submit(&self, file_id: &str) -> Result<()> {
        self.tx
            .send(file_id.to_string())
            .await
            .map_err(|_| DownloadError::Closed)?;
        debug!(file_id, "Download queued");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn dispatch(mut rx: mpsc::Receiver<String>, downloader: Arc<Downloader>) {
    while let Some(file_id) = rx.recv().await {
        let downloader = downloader.clone();
        tokio::spawn(async move {
            match downloader.download(&file_id).await {
                Ok(entry) => debug!(file_id = %file_id, entry_id = entry.id, "Queued download finished"),
                Err(DownloadError::AlreadyInProgress(_)) => {
                    debug!(file_id = %file_id, "Queued download skipped, already in progress")
                }
                Err(e) => warn!(file_id = %file_id, error = %e, "Queued download failed"),
            }
        });
    }
    debug!("Download queue stopped");
}
