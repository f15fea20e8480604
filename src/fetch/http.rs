//! HTTP(S) fetcher: streams a response body to a local file

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::{FetchError, FetchReport, Fetcher, Result};
use crate::config::HttpConfig;
use crate::humanize::ByteSize;

/// HTTP downloader
pub struct HttpFetcher {
    client: Client,
    copy_buffer: usize,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig, copy_buffer: ByteSize) -> Result<Self> {
        // No overall request timeout: large bodies may legitimately take hours
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10));

        if !config.system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            copy_buffer: copy_buffer.as_usize(),
        })
    }

    async fn stream_to(&self, url: &str, target: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await.map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let file = File::create(target).await?;
        let mut writer = BufWriter::with_capacity(self.copy_buffer, file);
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await.map_err(map_reqwest)? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, target: &Path) -> Result<FetchReport> {
        debug!(url, target = %target.display(), "Starting download");

        // The body lands next to the target and only replaces it once complete
        let partial = partial_path(target);
        let result = match self.stream_to(url, &partial).await {
            Ok(bytes) => tokio::fs::rename(&partial, target)
                .await
                .map(|_| bytes)
                .map_err(FetchError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => Ok(FetchReport {
                bytes,
                objects: 1,
                failed_objects: Vec::new(),
            }),
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&partial).await {
                    if remove.kind() != std::io::ErrorKind::NotFound {
                        warn!(partial = %partial.display(), error = %remove, "Failed to remove partial file");
                    }
                }
                Err(e)
            }
        }
    }
}

/// `<target>.part`
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_builder() {
        FetchError::InvalidUrl(e.to_string())
    } else {
        FetchError::RequestFailed(e.to_string())
    }
}
