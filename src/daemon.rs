use std::sync::Arc;

use hostfetch::config::Config;
use hostfetch::fetch::{Downloader, FetchError};
use hostfetch::jobs::{JobStore, PgJobStore, StatusUpdater, StoreError};
use hostfetch::observability::Metrics;
use hostfetch::queue::{
    ListenerError, NotificationListener, PgWakeSource, QueueScanner, ScanError, ScanSummary,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Local hostname is not valid UTF-8: {0}")]
    Hostname(String),

    #[error("Failed to prepare download directory: {0}")]
    BaseDir(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Subscribe, scan once, then scan on every signal for this host until
/// SIGINT/SIGTERM
pub async fn run(config: Config) -> Result<(), DaemonError> {
    let hostname = local_hostname()?;
    info!(%hostname, base_dir = %config.download.base_dir.display(), "Starting download worker");

    let store = PgJobStore::connect(&config.database).await?;
    // Subscribe before the startup scan so nothing queued in between is missed
    let source = PgWakeSource::subscribe(store.pool(), &config.database.channel).await?;

    let metrics = Arc::new(Metrics::new());
    let scanner = build_scanner(&config, Arc::new(store), hostname, metrics.clone()).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let result = NotificationListener::new(source, scanner).run(shutdown).await;
    info!(metrics = ?metrics.snapshot(), "Download worker stopped");

    Ok(result?)
}

/// A single scan without subscribing, for manual recovery or cron use
pub async fn scan_once(config: Config) -> Result<ScanSummary, DaemonError> {
    let hostname = local_hostname()?;
    let store = PgJobStore::connect(&config.database).await?;

    let metrics = Arc::new(Metrics::new());
    let scanner = build_scanner(&config, Arc::new(store), hostname, metrics).await?;

    Ok(scanner.scan().await?)
}

async fn build_scanner(
    config: &Config,
    store: Arc<dyn JobStore>,
    hostname: String,
    metrics: Arc<Metrics>,
) -> Result<QueueScanner, DaemonError> {
    tokio::fs::create_dir_all(&config.download.base_dir).await?;

    let downloader = Arc::new(Downloader::from_config(config)?);
    let updater = StatusUpdater::new(store.clone(), metrics.clone(), &config.status);

    Ok(QueueScanner::new(
        store,
        downloader,
        updater,
        metrics,
        hostname,
        &config.download,
    ))
}

fn local_hostname() -> Result<String, DaemonError> {
    gethostname::gethostname()
        .into_string()
        .map_err(|raw| DaemonError::Hostname(raw.to_string_lossy().into_owned()))
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, finishing current scan");
    token.cancel();
}
