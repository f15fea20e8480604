use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "HOSTFETCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/hostfetch.toml";
const ENV_PREFIX: &str = "HOSTFETCH";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = path.unwrap_or_else(|| {
        env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    });

    let mut config = load_from_sources(config_path)?;
    apply_env(&mut config, |key| env::var(key).ok());

    Ok(config)
}

/// Secrets and deployment variables that live outside the `HOSTFETCH__` namespace
fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if config.database.url.is_none() {
        config.database.url = lookup("DATABASE_URL");
    }

    if config.download.base_dir.as_os_str().is_empty() {
        if let Some(dir) = lookup("DOWNLOAD_QUEUE_DIRECTORY") {
            config.download.base_dir = PathBuf::from(dir);
        }
    }

    config.s3.access_key = lookup("AWS_ACCESS_KEY_ID").or_else(|| lookup("AWS_USERNAME"));
    config.s3.secret_key = lookup("AWS_SECRET_ACCESS_KEY").or_else(|| lookup("AWS_PASSWORD"));
}

/// Load configuration from a specific path and the `HOSTFETCH__*` environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // HOSTFETCH__DOWNLOAD__BASE_DIR -> download.base_dir
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
