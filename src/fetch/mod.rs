//! Resource fetching, dispatched by URL scheme
//!
//! - `s3:` URLs go to [`S3Fetcher`]: single objects become files, keys ending
//!   in `/` are downloaded recursively as a directory tree
//! - `http:` / `https:` URLs go to [`HttpFetcher`], which streams the body to disk
//! - Anything else is reported as [`DownloadOutcome::UnknownScheme`]; nothing is
//!   transferred and the caller decides what happens to the job

pub mod http;
pub mod s3;

pub use http::HttpFetcher;
pub use s3::{AwsBuckets, BucketResolver, S3Fetcher, S3Location, StaticBuckets};

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::humanize::ByteSize;
use crate::jobs::QueuedJob;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid target path: {0}")]
    InvalidTarget(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("{failed} of {total} objects under prefix failed to download")]
    PartialPrefix { failed: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// What a completed transfer produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub bytes: u64,
    pub objects: usize,
    /// Keys under a prefix that could not be transferred
    pub failed_objects: Vec<String>,
}

/// One transfer strategy
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` to `target`, whose parent directory already exists
    async fn fetch(&self, url: &str, target: &Path) -> Result<FetchReport>;
}

/// Recognised URL schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlScheme {
    S3,
    Http,
}

impl UrlScheme {
    /// Literal prefix match: `s3:`, then `http` (which also covers `https`)
    pub fn classify(url: &str) -> Option<Self> {
        if url.starts_with("s3:") {
            Some(UrlScheme::S3)
        } else if url.starts_with("http") {
            Some(UrlScheme::Http)
        } else {
            None
        }
    }
}

/// Result of a download attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Fetched(FetchReport),
    /// No fetcher handles this scheme; nothing was written
    UnknownScheme(String),
}

/// Dispatches jobs to the fetcher matching their URL scheme
pub struct Downloader {
    base_dir: PathBuf,
    s3: Arc<dyn Fetcher>,
    http: Arc<dyn Fetcher>,
}

impl Downloader {
    pub fn new(base_dir: impl Into<PathBuf>, s3: Arc<dyn Fetcher>, http: Arc<dyn Fetcher>) -> Self {
        Self {
            base_dir: base_dir.into(),
            s3,
            http,
        }
    }

    /// Production fetchers: reqwest for HTTP, AWS-backed object_store for S3
    pub fn from_config(config: &Config) -> Result<Self> {
        let buffer = config.download.copy_buffer;
        let http = HttpFetcher::new(&config.http, buffer)?;
        let s3 = S3Fetcher::new(
            Arc::new(AwsBuckets::new(config.s3.clone())),
            buffer,
            config.s3.fail_on_partial_prefix,
        );

        Ok(Self::new(
            config.download.base_dir.clone(),
            Arc::new(s3),
            Arc::new(http),
        ))
    }

    pub async fn download(&self, job: &QueuedJob) -> Result<DownloadOutcome> {
        let Some(scheme) = UrlScheme::classify(&job.url) else {
            return Ok(DownloadOutcome::UnknownScheme(scheme_of(&job.url).to_string()));
        };

        let target = resolve_target(&self.base_dir, &job.target_name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let fetcher = match scheme {
            UrlScheme::S3 => {
                info!(job_id = job.id, url = %job.url, "Downloading S3 url");
                &self.s3
            }
            UrlScheme::Http => {
                info!(job_id = job.id, url = %job.url, "Downloading http url");
                &self.http
            }
        };

        let report = fetcher.fetch(&job.url, &target).await?;

        debug!(
            job_id = job.id,
            target = %target.display(),
            size = %ByteSize(report.bytes),
            objects = report.objects,
            "Download complete"
        );

        Ok(DownloadOutcome::Fetched(report))
    }
}

/// Text before the first `:`, or the whole URL when there is none
fn scheme_of(url: &str) -> &str {
    url.split_once(':').map_or(url, |(scheme, _)| scheme)
}

/// Join a job's target name onto the base directory
///
/// The name must stay inside the base directory: absolute paths and `..`
/// components are rejected.
pub fn resolve_target(base_dir: &Path, target_name: &str) -> Result<PathBuf> {
    let relative = Path::new(target_name);
    let mut normal = 0;

    for component in relative.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            _ => return Err(FetchError::InvalidTarget(target_name.to_string())),
        }
    }

    if normal == 0 {
        return Err(FetchError::InvalidTarget(target_name.to_string()));
    }

    Ok(base_dir.join(relative))
}
