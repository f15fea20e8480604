use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Database URL is not configured (set database.url or DATABASE_URL)")]
    MissingDatabaseUrl,

    #[error("Invalid SQL identifier for {field}: '{value}'")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("Download base directory is not configured (set download.base_dir or DOWNLOAD_QUEUE_DIRECTORY)")]
    MissingBaseDir,

    #[error("database.max_connections must be at least 2, got {0} (the notification listener holds one connection)")]
    TooFewConnections(u32),

    #[error("{field} must be positive")]
    NotPositive { field: &'static str },

    #[error("S3 credentials are incomplete: both access key and secret key are required")]
    PartialS3Credentials,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_database(config)?;
    validate_download(config)?;
    validate_s3(config)?;
    validate_status(config)?;
    Ok(())
}

fn validate_database(config: &Config) -> Result<(), ValidationError> {
    if config.database.url.as_deref().is_none_or(str::is_empty) {
        return Err(ValidationError::MissingDatabaseUrl);
    }

    // One pooled connection stays checked out by the LISTEN subscription
    if config.database.max_connections < 2 {
        return Err(ValidationError::TooFewConnections(
            config.database.max_connections,
        ));
    }

    // The table name is interpolated into SQL, the channel into LISTEN
    if !is_qualified_identifier(&config.database.table) {
        return Err(ValidationError::InvalidIdentifier {
            field: "database.table",
            value: config.database.table.clone(),
        });
    }

    if !is_identifier(&config.database.channel) {
        return Err(ValidationError::InvalidIdentifier {
            field: "database.channel",
            value: config.database.channel.clone(),
        });
    }

    Ok(())
}

fn validate_download(config: &Config) -> Result<(), ValidationError> {
    if config.download.base_dir.as_os_str().is_empty() {
        return Err(ValidationError::MissingBaseDir);
    }

    if config.download.concurrency == 0 {
        return Err(ValidationError::NotPositive {
            field: "download.concurrency",
        });
    }

    if config.download.copy_buffer.as_u64() == 0 {
        return Err(ValidationError::NotPositive {
            field: "download.copy_buffer",
        });
    }

    Ok(())
}

fn validate_s3(config: &Config) -> Result<(), ValidationError> {
    if config.s3.access_key.is_some() != config.s3.secret_key.is_some() {
        return Err(ValidationError::PartialS3Credentials);
    }

    Ok(())
}

fn validate_status(config: &Config) -> Result<(), ValidationError> {
    if config.status.max_attempts == 0 {
        return Err(ValidationError::NotPositive {
            field: "status.max_attempts",
        });
    }

    Ok(())
}

/// `name` or `schema.name`
fn is_qualified_identifier(value: &str) -> bool {
    match value.split_once('.') {
        Some((schema, name)) => is_identifier(schema) && is_identifier(name),
        None => is_identifier(value),
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
