//! Download job records and their persistence
//!
//! Jobs are created in the shared job table by an external producer in the
//! `queued` state. This worker only reads the rows targeted at its own host and
//! moves each one to a terminal state exactly once:
//!
//! ```text
//! queued --(fetch success)--> downloaded
//! queued --(fetch failure)--> failed
//! ```
//!
//! - [`JobStore`] - Persistence seam (Postgres in production, in-memory in tests)
//! - [`PgJobStore`] - `sqlx` implementation against the shared table
//! - [`InMemoryJobStore`] - Test double with fault injection
//! - [`StatusUpdater`] - Applies one transition to one row

mod memory;
mod status;
mod store;

pub use memory::InMemoryJobStore;
pub use status::{StatusUpdater, StatusWrite, StatusWriteError};
pub use store::{JobStore, PgJobStore, StoreError};

use std::fmt;

/// Primary key of a row in the job table
pub type JobId = i64;

/// Persisted job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Downloaded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloaded => "downloaded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A full job row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub id: JobId,
    pub url: String,
    /// Path relative to the configured base directory
    pub target_name: String,
    pub target_hostname: String,
    pub status: JobStatus,
}

impl DownloadJob {
    pub fn queued(
        id: JobId,
        url: impl Into<String>,
        target_name: impl Into<String>,
        target_hostname: impl Into<String>,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            target_name: target_name.into(),
            target_hostname: target_hostname.into(),
            status: JobStatus::Queued,
        }
    }
}

/// The projection returned by a scan query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: JobId,
    pub url: String,
    pub target_name: String,
}

impl From<&DownloadJob> for QueuedJob {
    fn from(job: &DownloadJob) -> Self {
        Self {
            id: job.id,
            url: job.url.clone(),
            target_name: job.target_name.clone(),
        }
    }
}
