use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::{debug, info};

use super::{JobId, JobStatus, QueuedJob};
use crate::config::DatabaseConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Access to the shared job table
///
/// Both operations touch single rows only; no transaction spans a scan read
/// and the later status write.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All jobs with `status = queued` whose target host is `hostname`
    async fn queued_for_host(&self, hostname: &str) -> Result<Vec<QueuedJob>>;

    /// Move a queued job to `status`, returning the number of rows affected
    ///
    /// Rows that already left `queued` are not touched, so a terminal state
    /// can never be overwritten.
    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<u64>;
}

/// Postgres-backed job store
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    select_sql: String,
    update_sql: String,
}

impl PgJobStore {
    /// Wrap an existing pool; `table` must already be a validated identifier
    pub fn new(pool: PgPool, table: &str) -> Self {
        let select_sql = format!(
            "SELECT download_id, url, name FROM {table} \
             WHERE target_hostname = $1 AND status = 'queued'"
        );
        let update_sql = format!(
            "UPDATE {table} SET status = $1 \
             WHERE download_id = $2 AND status = 'queued'"
        );

        Self {
            pool,
            select_sql,
            update_sql,
        }
    }

    /// Open a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("database url not configured".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;

        info!(table = %config.table, "Connected to job store");
        Ok(Self::new(pool, &config.table))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn queued_for_host(&self, hostname: &str) -> Result<Vec<QueuedJob>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(&self.select_sql)
            .bind(hostname)
            .fetch_all(&self.pool)
            .await?;

        debug!(hostname, count = rows.len(), "Fetched queued jobs");

        Ok(rows
            .into_iter()
            .map(|(id, url, target_name)| QueuedJob {
                id,
                url,
                target_name,
            })
            .collect())
    }

    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<u64> {
        let result = sqlx::query(&self.update_sql)
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
