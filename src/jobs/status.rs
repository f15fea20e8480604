use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use super::store::{JobStore, StoreError};
use super::{JobId, JobStatus};
use crate::config::StatusConfig;
use crate::observability::Metrics;

/// Outcome of a status write that reached the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    /// Exactly one row moved
    Applied,
    /// The statement ran but did not affect exactly one row
    Anomaly { rows: u64 },
}

#[derive(Debug, Error)]
#[error("failed to mark job {id} as {status} after {attempts} attempt(s): {source}")]
pub struct StatusWriteError {
    pub id: JobId,
    pub status: JobStatus,
    pub attempts: u32,
    #[source]
    pub source: StoreError,
}

/// Applies single state transitions to job rows
///
/// A row-count anomaly is logged and reported, never retried. A store error is
/// retried up to `max_attempts` times with a fixed delay and then escalated to
/// the caller; the local download result is not rolled back either way.
pub struct StatusUpdater {
    store: Arc<dyn JobStore>,
    metrics: Arc<Metrics>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl StatusUpdater {
    pub fn new(store: Arc<dyn JobStore>, metrics: Arc<Metrics>, config: &StatusConfig) -> Self {
        Self {
            store,
            metrics,
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub async fn apply(
        &self,
        id: JobId,
        status: JobStatus,
    ) -> Result<StatusWrite, StatusWriteError> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.store.set_status(id, status).await {
                Ok(1) => {
                    debug!(job_id = id, %status, "Job status updated");
                    return Ok(StatusWrite::Applied);
                }
                Ok(rows) => {
                    error!(job_id = id, %status, rows, "Status update did not affect exactly one row");
                    self.metrics.status_anomaly();
                    return Ok(StatusWrite::Anomaly { rows });
                }
                Err(e) if attempts < self.max_attempts => {
                    warn!(job_id = id, %status, attempts, error = %e, "Status update failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(source) => {
                    error!(job_id = id, %status, attempts, error = %source, "Status update failed, giving up");
                    self.metrics.status_write_failed();
                    return Err(StatusWriteError {
                        id,
                        status,
                        attempts,
                        source,
                    });
                }
            }
        }
    }
}
