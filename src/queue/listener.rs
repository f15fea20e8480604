//! Wake-signal subscription and the listen loop

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::scanner::{QueueScanner, ScanSummary};
use super::{ListenerError, ScanError};

/// Source of wake signals; each payload is a target hostname
#[async_trait]
pub trait WakeSource: Send {
    /// Wait for the next signal
    async fn recv(&mut self) -> Result<String, ListenerError>;
}

/// Postgres `LISTEN` subscription
pub struct PgWakeSource {
    listener: PgListener,
    channel: String,
}

impl PgWakeSource {
    /// Subscribe to `channel`; signals are only delivered from this point on
    pub async fn subscribe(pool: &PgPool, channel: &str) -> Result<Self, ListenerError> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(channel).await?;

        info!(channel, "Subscribed to notification channel");
        Ok(Self {
            listener,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl WakeSource for PgWakeSource {
    async fn recv(&mut self) -> Result<String, ListenerError> {
        // try_recv reports a dropped connection instead of silently
        // reconnecting, which would hide missed signals
        match self.listener.try_recv().await? {
            Some(notification) => Ok(notification.payload().to_string()),
            None => Err(ListenerError::Disconnected(self.channel.clone())),
        }
    }
}

/// In-process wake source fed by an mpsc channel
pub struct ChannelWakeSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelWakeSource {
    pub fn new(buffer: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl WakeSource for ChannelWakeSource {
    async fn recv(&mut self) -> Result<String, ListenerError> {
        self.rx.recv().await.ok_or(ListenerError::Closed)
    }
}

/// Runs a scan at startup and again for every signal naming this host
///
/// Signals are handled one at a time: a scan always runs to completion
/// before the next signal is read, and scans never overlap.
pub struct NotificationListener<W> {
    source: W,
    scanner: QueueScanner,
}

impl<W: WakeSource> NotificationListener<W> {
    pub fn new(source: W, scanner: QueueScanner) -> Self {
        Self { source, scanner }
    }

    /// Listen until `shutdown` is cancelled or a fatal error occurs
    ///
    /// The source must already be subscribed; the startup scan covers jobs
    /// queued before that point.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        info!(hostname = %self.scanner.hostname(), "Running startup scan");
        self.scanner.scan().await?;

        loop {
            let payload = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, listener stopping");
                    return Ok(());
                }
                signal = self.source.recv() => signal?,
            };

            self.handle(&payload).await?;
        }
    }

    /// React to one signal; `None` when it targets another host
    pub async fn handle(&self, target_hostname: &str) -> Result<Option<ScanSummary>, ScanError> {
        trace!(
            current_hostname = %self.scanner.hostname(),
            target_hostname,
            "Received wake signal"
        );

        if target_hostname != self.scanner.hostname() {
            trace!("Hostname does not match, ignoring signal");
            return Ok(None);
        }

        debug!("Wake signal for this host, scanning");
        self.scanner.scan().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DownloadConfig, StatusConfig};
    use crate::fetch::{Downloader, FetchReport, Fetcher};
    use crate::jobs::{DownloadJob, InMemoryJobStore, JobStatus};
    use crate::observability::Metrics;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct TouchFetcher;

    #[async_trait]
    impl Fetcher for TouchFetcher {
        async fn fetch(&self, _url: &str, target: &Path) -> crate::fetch::Result<FetchReport> {
            tokio::fs::write(target, b"ok").await?;
            Ok(FetchReport {
                bytes: 2,
                objects: 1,
                failed_objects: vec![],
            })
        }
    }

    fn scanner(store: Arc<InMemoryJobStore>, dir: &TempDir) -> (QueueScanner, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let fetcher = Arc::new(TouchFetcher);
        let downloader = Arc::new(Downloader::new(dir.path(), fetcher.clone(), fetcher));
        let updater = crate::jobs::StatusUpdater::new(
            store.clone(),
            metrics.clone(),
            &StatusConfig::default(),
        );
        let scanner = QueueScanner::new(
            store,
            downloader,
            updater,
            metrics.clone(),
            "worker-1",
            &DownloadConfig::default(),
        );
        (scanner, metrics)
    }

    #[tokio::test]
    async fn test_foreign_signal_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryJobStore::with_jobs([DownloadJob::queued(
            1, "https://h/a", "a", "worker-1",
        )]));
        let (scanner, metrics) = scanner(store.clone(), &dir);
        let (_tx, source) = ChannelWakeSource::new(4);
        let listener = NotificationListener::new(source, scanner);

        assert_eq!(listener.handle("worker-2").await.unwrap(), None);
        assert_eq!(store.status_of(1), Some(JobStatus::Queued));
        assert_eq!(metrics.snapshot().scans, 0);
    }

    #[tokio::test]
    async fn test_matching_signal_triggers_scan() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let (scanner, _) = scanner(store.clone(), &dir);
        let (_tx, source) = ChannelWakeSource::new(4);
        let listener = NotificationListener::new(source, scanner);

        store.insert(DownloadJob::queued(5, "https://h/e", "e", "worker-1"));
        let summary = listener.handle("worker-1").await.unwrap().unwrap();

        assert_eq!(summary.downloaded, 1);
        assert_eq!(store.status_of(5), Some(JobStatus::Downloaded));
    }

    #[tokio::test]
    async fn test_run_scans_at_startup_and_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryJobStore::with_jobs([DownloadJob::queued(
            1, "https://h/a", "a", "worker-1",
        )]));
        let (scanner, metrics) = scanner(store.clone(), &dir);
        let (_tx, source) = ChannelWakeSource::new(4);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        NotificationListener::new(source, scanner)
            .run(shutdown)
            .await
            .unwrap();

        assert_eq!(store.status_of(1), Some(JobStatus::Downloaded));
        assert_eq!(metrics.snapshot().scans, 1);
    }

    #[tokio::test]
    async fn test_closed_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (scanner, _) = scanner(Arc::new(InMemoryJobStore::new()), &dir);
        let (tx, source) = ChannelWakeSource::new(4);
        drop(tx);

        let result = NotificationListener::new(source, scanner)
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ListenerError::Closed)));
    }

    #[tokio::test]
    async fn test_startup_scan_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        store.fail_reads(true);
        let (scanner, _) = scanner(store, &dir);
        let (_tx, source) = ChannelWakeSource::new(4);

        let result = NotificationListener::new(source, scanner)
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ListenerError::Scan(_))));
    }
}
