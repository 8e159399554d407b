//! PostgreSQL sink for cache audit records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use vitalis_cache::error::Result;
use vitalis_cache::{CacheAuditSink, CacheError, CacheErrorRecord, CacheOperationRecord};

/// Durable audit sink writing operation and error records to Postgres.
///
/// The manager calls this sink fire-and-forget, so a slow or failing
/// database never touches the cache hot path.
#[derive(Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
    tables_created: Arc<DashSet<String>>,
}

impl PostgresAuditSink {
    /// Create a new PostgreSQL audit sink.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables_created: Arc::new(DashSet::new()),
        }
    }

    /// Ensure the audit tables exist.
    #[instrument(skip(self))]
    async fn ensure_tables(&self) -> Result<()> {
        if self.tables_created.contains("audit") {
            return Ok(());
        }

        sqlx_core::query::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_operation_logs (
                id BIGSERIAL PRIMARY KEY,
                operation TEXT NOT NULL,
                cache_key TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}',
                timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::audit(e.to_string()))?;

        sqlx_core::query::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_error_logs (
                id BIGSERIAL PRIMARY KEY,
                operation TEXT NOT NULL,
                cache_key TEXT NOT NULL,
                error_message TEXT NOT NULL,
                error_stack TEXT,
                timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::audit(e.to_string()))?;

        sqlx_core::query::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_cache_operation_logs_key
                ON cache_operation_logs(cache_key);
            CREATE INDEX IF NOT EXISTS idx_cache_operation_logs_time
                ON cache_operation_logs(timestamp);
            CREATE INDEX IF NOT EXISTS idx_cache_error_logs_time
                ON cache_error_logs(timestamp);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::audit(e.to_string()))?;

        info!("Created cache audit tables");
        self.tables_created.insert("audit".to_string());
        Ok(())
    }

    fn time_to_chrono(t: OffsetDateTime) -> DateTime<Utc> {
        DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond()).unwrap_or_else(Utc::now)
    }

    /// Delete audit rows older than the cutoff. Returns rows removed.
    pub async fn delete_logs_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        self.ensure_tables().await?;

        let mut removed = 0u64;
        for table in ["cache_operation_logs", "cache_error_logs"] {
            let result =
                sqlx_core::query::query(&format!("DELETE FROM {table} WHERE timestamp < $1"))
                    .bind(Self::time_to_chrono(cutoff))
                    .execute(&self.pool)
                    .await
                    .map_err(|e| CacheError::audit(e.to_string()))?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheAuditSink for PostgresAuditSink {
    async fn log_operation(&self, record: CacheOperationRecord) -> Result<()> {
        self.ensure_tables().await?;

        sqlx_core::query::query(
            r#"
            INSERT INTO cache_operation_logs (operation, cache_key, metadata, timestamp)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.operation)
        .bind(&record.cache_key)
        .bind(&record.metadata)
        .bind(Self::time_to_chrono(record.timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::audit(e.to_string()))?;

        debug!(operation = %record.operation, cache_key = %record.cache_key, "Logged cache operation");
        Ok(())
    }

    async fn log_error(&self, record: CacheErrorRecord) -> Result<()> {
        self.ensure_tables().await?;

        sqlx_core::query::query(
            r#"
            INSERT INTO cache_error_logs (operation, cache_key, error_message, error_stack, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.operation)
        .bind(&record.cache_key)
        .bind(&record.error_message)
        .bind(&record.error_stack)
        .bind(Self::time_to_chrono(record.timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::audit(e.to_string()))?;

        Ok(())
    }
}
