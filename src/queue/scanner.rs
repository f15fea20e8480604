//! One pass over the queued jobs targeted at this host

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::ScanError;
use crate::config::{DownloadConfig, UnknownSchemePolicy};
use crate::fetch::{DownloadOutcome, Downloader};
use crate::jobs::{JobStatus, JobStore, QueuedJob, StatusUpdater, StatusWrite};
use crate::observability::Metrics;

/// What happened to one job during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// A terminal status was determined; `recorded` is false when the status
    /// write did not land on exactly one row
    Finished { status: JobStatus, recorded: bool },
    /// Unknown scheme under the `leave_queued` policy
    LeftQueued,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub visited: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub left_queued: usize,
    pub unrecorded: usize,
}

impl ScanSummary {
    fn record(&mut self, outcome: JobOutcome) {
        self.visited += 1;
        match outcome {
            JobOutcome::Finished { status, recorded } => {
                match status {
                    JobStatus::Downloaded => self.downloaded += 1,
                    _ => self.failed += 1,
                }
                if !recorded {
                    self.unrecorded += 1;
                }
            }
            JobOutcome::LeftQueued => self.left_queued += 1,
        }
    }
}

/// Finds queued jobs for `hostname` and drives each through download and
/// status update
///
/// Every job runs inside its own failure boundary: a fetch error becomes a
/// `failed` status and the scan moves on. Only a failure to read the job
/// list aborts the scan.
pub struct QueueScanner {
    store: Arc<dyn JobStore>,
    downloader: Arc<Downloader>,
    updater: StatusUpdater,
    metrics: Arc<Metrics>,
    hostname: String,
    unknown_scheme: UnknownSchemePolicy,
    concurrency: usize,
}

impl QueueScanner {
    pub fn new(
        store: Arc<dyn JobStore>,
        downloader: Arc<Downloader>,
        updater: StatusUpdater,
        metrics: Arc<Metrics>,
        hostname: impl Into<String>,
        config: &DownloadConfig,
    ) -> Self {
        Self {
            store,
            downloader,
            updater,
            metrics,
            hostname: hostname.into(),
            unknown_scheme: config.unknown_scheme,
            concurrency: config.concurrency.max(1),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub async fn scan(&self) -> Result<ScanSummary, ScanError> {
        let jobs = self.store.queued_for_host(&self.hostname).await?;

        if jobs.is_empty() {
            debug!(hostname = %self.hostname, "No queued jobs");
            self.metrics.scan_completed();
            return Ok(ScanSummary::default());
        }

        info!(hostname = %self.hostname, count = jobs.len(), "Processing queued jobs");

        // Ordering between jobs is not guaranteed once concurrency > 1
        let outcomes: Vec<JobOutcome> = futures::stream::iter(jobs)
            .map(|job| self.process(job))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = ScanSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }

        self.metrics.scan_completed();
        info!(
            visited = summary.visited,
            downloaded = summary.downloaded,
            failed = summary.failed,
            left_queued = summary.left_queued,
            unrecorded = summary.unrecorded,
            "Scan complete"
        );

        Ok(summary)
    }

    async fn process(&self, job: QueuedJob) -> JobOutcome {
        let status = match self.downloader.download(&job).await {
            Ok(DownloadOutcome::Fetched(report)) => {
                if !report.failed_objects.is_empty() {
                    warn!(
                        job_id = job.id,
                        failed = report.failed_objects.len(),
                        "Marking prefix download as downloaded despite failed objects"
                    );
                }
                info!(job_id = job.id, "Download complete");
                JobStatus::Downloaded
            }
            Ok(DownloadOutcome::UnknownScheme(scheme)) => {
                error!(job_id = job.id, url = %job.url, scheme, "Unknown URL type");
                match self.unknown_scheme {
                    UnknownSchemePolicy::LeaveQueued => {
                        self.metrics.job_left_queued();
                        return JobOutcome::LeftQueued;
                    }
                    UnknownSchemePolicy::Fail => JobStatus::Failed,
                }
            }
            Err(e) => {
                error!(job_id = job.id, url = %job.url, error = %e, "Download failed");
                JobStatus::Failed
            }
        };

        match status {
            JobStatus::Downloaded => self.metrics.job_downloaded(),
            _ => self.metrics.job_failed(),
        }

        // Write failures are logged by the updater; the scan carries on
        let recorded = matches!(
            self.updater.apply(job.id, status).await,
            Ok(StatusWrite::Applied)
        );

        JobOutcome::Finished { status, recorded }
    }
}
