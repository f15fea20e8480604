//! In-process counters for the worker

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle shared by the scanner and status updater
#[derive(Debug, Default)]
pub struct Metrics {
    scans: AtomicU64,
    jobs_downloaded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_left_queued: AtomicU64,
    status_anomalies: AtomicU64,
    status_write_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_completed(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_downloaded(&self) {
        self.jobs_downloaded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_downloaded", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn job_left_queued(&self) {
        self.jobs_left_queued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_left_queued", "Metric incremented");
    }

    pub fn status_anomaly(&self) {
        self.status_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_write_failed(&self) {
        self.status_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            jobs_downloaded: self.jobs_downloaded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_left_queued: self.jobs_left_queued.load(Ordering::Relaxed),
            status_anomalies: self.status_anomalies.load(Ordering::Relaxed),
            status_write_failures: self.status_write_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub scans: u64,
    pub jobs_downloaded: u64,
    pub jobs_failed: u64,
    pub jobs_left_queued: u64,
    pub status_anomalies: u64,
    pub status_write_failures: u64,
}
