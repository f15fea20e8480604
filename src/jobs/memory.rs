use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use super::store::{JobStore, Result, StoreError};
use super::{DownloadJob, JobId, JobStatus, QueuedJob};

/// In-memory job table for tests and local experiments
///
/// Mirrors the Postgres statements: scans filter on host and `queued`, and
/// status writes only touch rows that are still `queued`.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<BTreeMap<JobId, DownloadJob>>,
    fail_reads: AtomicBool,
    failing_writes: AtomicU32,
    write_attempts: AtomicU32,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = DownloadJob>) -> Self {
        let store = Self::new();
        for job in jobs {
            store.insert(job);
        }
        store
    }

    pub fn insert(&self, job: DownloadJob) {
        self.lock().insert(job.id, job);
    }

    pub fn status_of(&self, id: JobId) -> Option<JobStatus> {
        self.lock().get(&id).map(|job| job.status)
    }

    pub fn jobs(&self) -> Vec<DownloadJob> {
        self.lock().values().cloned().collect()
    }

    /// Make every scan query fail until reset
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` status writes fail with a store error
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of `set_status` calls seen, including failed ones
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<JobId, DownloadJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn queued_for_host(&self, hostname: &str) -> Result<Vec<QueuedJob>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }

        Ok(self
            .lock()
            .values()
            .filter(|job| job.status == JobStatus::Queued && job.target_hostname == hostname)
            .map(QueuedJob::from)
            .collect())
    }

    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<u64> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }

        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = status;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}
