//! Notification-driven dequeue loop
//!
//! ```text
//! NotificationListener --signal for this host--> QueueScanner
//!                                                 ├─ Downloader
//!                                                 └─ StatusUpdater
//! ```
//!
//! The listener subscribes first, scans once unconditionally, then scans
//! again whenever a signal names this host. Per-job faults stay inside the
//! scan; query and channel faults end the loop.

pub mod listener;
pub mod scanner;

pub use listener::{ChannelWakeSource, NotificationListener, PgWakeSource, WakeSource};
pub use scanner::{JobOutcome, QueueScanner, ScanSummary};

use thiserror::Error;

use crate::jobs::StoreError;

/// Failure to enumerate queued jobs
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to read queued jobs: {0}")]
    Query(#[from] StoreError),
}

/// Failure of the subscription or of a scan it triggered
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Notification channel error: {0}")]
    Channel(#[from] sqlx::Error),

    #[error("Lost connection while listening on '{0}'")]
    Disconnected(String),

    #[error("Wake source closed")]
    Closed,

    #[error(transparent)]
    Scan(#[from] ScanError),
}
