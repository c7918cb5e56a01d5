use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Snapshot of one in-flight transfer
#[derive(Debug, Clone, Serialize)]
pub struct DownloadProgress {
    pub file_id: String,
    pub file_name: String,
    pub bytes_written: u64,
    pub total_bytes: u64,
    pub started_at: DateTime<Utc>,
    /// Bytes per second averaged since start
    pub speed: f64,
    #[serde(skip)]
    started: Instant,
}

impl DownloadProgress {
    fn new(file_id: &str, file_name: &str, total_bytes: u64) -> Self {
        Self {
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            bytes_written: 0,
            total_bytes,
            started_at: Utc::now(),
            speed: 0.0,
            started: Instant::now(),
        }
    }

    /// 0 when the total size is unknown
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_written as f64 / self.total_bytes as f64 * 100.0
    }

    /// Zero when the speed is zero or the total is unknown
    pub fn eta(&self) -> Duration {
        if self.speed <= 0.0 || self.total_bytes <= self.bytes_written {
            return Duration::ZERO;
        }
        let remaining = (self.total_bytes - self.bytes_written) as f64;
        Duration::from_secs_f64(remaining / self.speed)
    }
}

/// In-flight transfer registry, keyed by file id
#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: Mutex<HashMap<String, DownloadProgress>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, file_id: &str, file_name: &str, total_bytes: u64) {
        let progress = DownloadProgress::new(file_id, file_name, total_bytes);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(file_id.to_string(), progress);
        }
    }

    pub fn update(&self, file_id: &str, bytes_written: u64, total_bytes: u64) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if let Some(progress) = entries.get_mut(file_id) {
            progress.bytes_written = bytes_written;
            if total_bytes > 0 {
                progress.total_bytes = total_bytes;
            }
            let elapsed = progress.started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                progress.speed = bytes_written as f64 / elapsed;
            }
        }
    }

    pub fn complete(&self, file_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(file_id);
        }
    }

    pub fn get(&self, file_id: &str) -> Option<DownloadProgress> {
        self.entries.lock().ok()?.get(file_id).cloned()
    }

    /// Copies of every entry, ordered by start time
    pub fn get_all(&self) -> Vec<DownloadProgress> {
        let mut all: Vec<_> = match self.entries.lock() {
            Ok(entries) => entries.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        all.sort_by_key(|p| p.started);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
