//! Download orchestration
//!
//! [`Downloader::download`] runs one transfer end to end:
//!
//! 1. Single-flight registration by file id (`AlreadyInProgress` otherwise)
//! 2. Wait for a concurrency slot, bounded by the cancel scope
//! 3. Append a `downloading` entry and emit `download.started`
//! 4. Stream adapter bytes into `<path>.tmp` through a sha256 writer
//! 5. Rename into place and record `completed`, or remove the temp file and
//!    record `failed`/`cancelled`
//!
//! [`DownloadQueue`] is the background submission path used by the
//! scheduler and catalog operations.

mod error;
pub mod hashing;
mod orchestrator;
mod progress;
mod queue;

pub use error::{DownloadError, Result};
pub use hashing::{HashingWriter, sha256_checksum, verify_checksum};
pub use orchestrator::{DownloadSettings, Downloader};
pub use progress::{DownloadProgress, ProgressTracker};
pub use queue::DownloadQueue;
