//! Configuration management for hostfetch
//!
//! Settings are layered, lowest priority first:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. `HOSTFETCH__<section>__<key>` environment variables
//!
//! Secrets and deployment variables are read from the plain environment:
//! `DATABASE_URL`, `DOWNLOAD_QUEUE_DIRECTORY`, `AWS_ACCESS_KEY_ID` /
//! `AWS_SECRET_ACCESS_KEY` (or `AWS_USERNAME` / `AWS_PASSWORD`).
//!
//! The local hostname is deliberately absent: it always comes from the OS.
//!
//! ```no_run
//! use hostfetch::config::Config;
//!
//! let config = Config::load(None).expect("Failed to load configuration");
//! println!("Downloading into: {}", config.download.base_dir.display());
//! ```

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    Config, DatabaseConfig, DownloadConfig, HttpConfig, S3Config, StatusConfig,
    UnknownSchemePolicy,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load and validate configuration from all sources
    ///
    /// `path` overrides `HOSTFETCH_CONFIG` and the default
    /// `config/hostfetch.toml`; a missing file is not an error.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load a specific file plus `HOSTFETCH__*` overrides, without the plain
    /// environment secrets
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[database]
url = "postgres://localhost/postgres"

[download]
base_dir = "/srv/downloads"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.download.concurrency, 1);
        assert_eq!(config.database.table, "remote_server_download_queue");
    }

    #[test]
    fn test_validation_runs_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[database]
url = "postgres://localhost/postgres"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::MissingBaseDir)
        ));
    }
}
