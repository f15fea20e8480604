use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub status: StatusConfig,
}

/// Job table and notification channel
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection URL (usually supplied through `DATABASE_URL`)
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            table: default_table(),
            channel: default_channel(),
        }
    }
}

fn default_max_connections() -> u32 {
    2
}

fn default_table() -> String {
    "remote_server_download_queue".to_string()
}

fn default_channel() -> String {
    "remote_server_download_queue_updated".to_string()
}

/// What to do with a job whose URL scheme has no fetcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSchemePolicy {
    /// Log and leave the row `queued`
    #[default]
    LeaveQueued,
    /// Mark the row `failed`
    Fail,
}

/// Local download behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Directory that job target names are resolved against
    #[serde(default)]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub unknown_scheme: UnknownSchemePolicy,
    /// Jobs fetched at the same time within one scan (1 = sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Write buffer used when streaming to disk
    #[serde(default = "default_copy_buffer")]
    pub copy_buffer: ByteSize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::new(),
            unknown_scheme: UnknownSchemePolicy::default(),
            concurrency: default_concurrency(),
            copy_buffer: default_copy_buffer(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_copy_buffer() -> ByteSize {
    ByteSize(64 * 1024)
}

/// HTTP fetcher settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Honour `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY`
    #[serde(default = "default_system_proxy")]
    pub system_proxy: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            system_proxy: default_system_proxy(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_system_proxy() -> bool {
    true
}

fn default_user_agent() -> String {
    concat!("hostfetch/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Object storage settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Config {
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
    /// Mark prefix downloads `failed` when any object under the prefix fails
    #[serde(default)]
    pub fail_on_partial_prefix: bool,
    /// Loaded from environment, never from the config file
    #[serde(skip)]
    pub access_key: Option<String>,
    /// Loaded from environment, never from the config file
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            allow_http: false,
            fail_on_partial_prefix: false,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Status write retry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}
