//! Recurring product sync
//!
//! Each scheduled product gets one trigger task that sleeps until the next
//! cron fire time and then runs a [`SyncRunner`] pass: enumerate deliveries
//! and files through the source adapter, record what is new, emit
//! `file.available`, and queue auto-downloads.

mod expression;
mod error;
mod sync;
mod triggers;

pub use expression::{next_after, parse_schedule};
pub use error::{ScheduleError, SyncError};
pub use sync::{SyncReport, SyncRunner};
pub use triggers::Scheduler;
