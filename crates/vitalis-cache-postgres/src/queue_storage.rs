//! PostgreSQL storage for the invalidation queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use vitalis_invalidation::{
    InvalidationError, InvalidationQueueItem, InvalidationQueueStorage, QueueStats,
};

type QueueRow = (
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
    bool,
    Option<DateTime<Utc>>,
    i32,
    Option<String>,
);

/// PostgreSQL implementation of the invalidation queue.
///
/// Polling deliberately does not take row locks (`FOR UPDATE SKIP
/// LOCKED`): concurrent pollers may fetch the same rows, and the
/// idempotent delete-only cascades make that duplicate work harmless.
#[derive(Clone)]
pub struct PostgresQueueStorage {
    pool: PgPool,
    tables_created: Arc<DashSet<String>>,
}

impl PostgresQueueStorage {
    /// Create a new PostgreSQL queue storage.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables_created: Arc::new(DashSet::new()),
        }
    }

    /// Ensure the queue table exists.
    #[instrument(skip(self))]
    async fn ensure_tables(&self) -> Result<(), InvalidationError> {
        if self.tables_created.contains("invalidation_queue") {
            return Ok(());
        }

        sqlx_core::query::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_invalidation_queue (
                id TEXT PRIMARY KEY,
                cache_key TEXT NOT NULL,
                cache_type TEXT NOT NULL,
                user_id TEXT,
                invalidated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                processed_at TIMESTAMPTZ,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        sqlx_core::query::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_invalidation_queue_pending
                ON cache_invalidation_queue(invalidated_at) WHERE NOT processed;
            CREATE INDEX IF NOT EXISTS idx_invalidation_queue_processed_at
                ON cache_invalidation_queue(processed_at) WHERE processed_at IS NOT NULL;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        info!("Created cache invalidation queue table");
        self.tables_created.insert("invalidation_queue".to_string());
        Ok(())
    }

    fn time_to_chrono(t: OffsetDateTime) -> DateTime<Utc> {
        DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond()).unwrap_or_else(Utc::now)
    }

    fn chrono_to_time(t: DateTime<Utc>) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(t.timestamp())
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
    }

    fn row_to_item(row: QueueRow) -> InvalidationQueueItem {
        let (
            id,
            cache_key,
            cache_type,
            user_id,
            invalidated_at,
            processed,
            processed_at,
            retry_count,
            error_message,
        ) = row;
        InvalidationQueueItem {
            id,
            cache_key,
            cache_type,
            user_id,
            invalidated_at: Self::chrono_to_time(invalidated_at),
            processed,
            processed_at: processed_at.map(Self::chrono_to_time),
            retry_count: retry_count.max(0) as u32,
            error_message,
        }
    }
}

#[async_trait]
impl InvalidationQueueStorage for PostgresQueueStorage {
    async fn enqueue(&self, item: &InvalidationQueueItem) -> Result<(), InvalidationError> {
        self.ensure_tables().await?;

        sqlx_core::query::query(
            r#"
            INSERT INTO cache_invalidation_queue (
                id, cache_key, cache_type, user_id, invalidated_at,
                processed, processed_at, retry_count, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&item.id)
        .bind(&item.cache_key)
        .bind(&item.cache_type)
        .bind(&item.user_id)
        .bind(Self::time_to_chrono(item.invalidated_at))
        .bind(item.processed)
        .bind(item.processed_at.map(Self::time_to_chrono))
        .bind(item.retry_count as i32)
        .bind(&item.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        debug!(id = %item.id, cache_key = %item.cache_key, "Enqueued invalidation");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<InvalidationQueueItem>, InvalidationError> {
        self.ensure_tables().await?;

        let row: Option<QueueRow> = sqlx_core::query_as::query_as(
            r#"
            SELECT id, cache_key, cache_type, user_id, invalidated_at,
                   processed, processed_at, retry_count, error_message
            FROM cache_invalidation_queue WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        Ok(row.map(Self::row_to_item))
    }

    async fn fetch_pending(
        &self,
        limit: i64,
        max_retries: u32,
    ) -> Result<Vec<InvalidationQueueItem>, InvalidationError> {
        self.ensure_tables().await?;

        let rows: Vec<QueueRow> = sqlx_core::query_as::query_as(
            r#"
            SELECT id, cache_key, cache_type, user_id, invalidated_at,
                   processed, processed_at, retry_count, error_message
            FROM cache_invalidation_queue
            WHERE NOT processed AND retry_count < $2
            ORDER BY invalidated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(max_retries as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        Ok(rows.into_iter().map(Self::row_to_item).collect())
    }

    async fn mark_processed(&self, id: &str) -> Result<(), InvalidationError> {
        self.ensure_tables().await?;

        sqlx_core::query::query(
            r#"
            UPDATE cache_invalidation_queue
            SET processed = TRUE, processed_at = NOW(), error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn record_failure(&self, id: &str, error: &str) -> Result<(), InvalidationError> {
        self.ensure_tables().await?;

        sqlx_core::query::query(
            r#"
            UPDATE cache_invalidation_queue
            SET retry_count = retry_count + 1, error_message = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn requeue(&self, id: &str) -> Result<bool, InvalidationError> {
        self.ensure_tables().await?;

        let result = sqlx_core::query::query(
            r#"
            UPDATE cache_invalidation_queue
            SET retry_count = 0, error_message = NULL
            WHERE id = $1 AND NOT processed
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_processed_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<u64, InvalidationError> {
        self.ensure_tables().await?;

        let result = sqlx_core::query::query(
            r#"
            DELETE FROM cache_invalidation_queue
            WHERE processed AND processed_at < $1
            "#,
        )
        .bind(Self::time_to_chrono(cutoff))
        .execute(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn list_frozen(
        &self,
        max_retries: u32,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InvalidationQueueItem>, InvalidationError> {
        self.ensure_tables().await?;

        let rows: Vec<QueueRow> = sqlx_core::query_as::query_as(
            r#"
            SELECT id, cache_key, cache_type, user_id, invalidated_at,
                   processed, processed_at, retry_count, error_message
            FROM cache_invalidation_queue
            WHERE NOT processed AND retry_count >= $1
            ORDER BY invalidated_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(max_retries as i32)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        Ok(rows.into_iter().map(Self::row_to_item).collect())
    }

    async fn stats(&self, max_retries: u32) -> Result<QueueStats, InvalidationError> {
        self.ensure_tables().await?;

        let row: (i64, i64, i64) = sqlx_core::query_as::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE NOT processed AND retry_count < $1),
                COUNT(*) FILTER (WHERE NOT processed AND retry_count >= $1),
                COUNT(*) FILTER (WHERE processed)
            FROM cache_invalidation_queue
            "#,
        )
        .bind(max_retries as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| InvalidationError::Storage(e.to_string()))?;

        Ok(QueueStats {
            pending: row.0.max(0) as u32,
            frozen: row.1.max(0) as u32,
            processed: row.2.max(0) as u32,
        })
    }
}
