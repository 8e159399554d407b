use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::InvalidationError;
use crate::types::{InvalidationQueueItem, QueueStats};

/// Storage trait for the invalidation queue.
///
/// Producers only ever call `enqueue` (append-only contract); the
/// processor owns every mutation. Implementations do not need any
/// cross-instance claim protocol: cascades are idempotent deletes, so
/// at-least-once execution under concurrent pollers is safe.
#[async_trait]
pub trait InvalidationQueueStorage: Send + Sync {
    /// Append a pending item to the queue.
    async fn enqueue(&self, item: &InvalidationQueueItem) -> Result<(), InvalidationError>;

    /// Get an item by ID.
    async fn get(&self, id: &str) -> Result<Option<InvalidationQueueItem>, InvalidationError>;

    /// Fetch pending items eligible for processing: unprocessed, below
    /// the retry ceiling, oldest `invalidated_at` first.
    async fn fetch_pending(
        &self,
        limit: i64,
        max_retries: u32,
    ) -> Result<Vec<InvalidationQueueItem>, InvalidationError>;

    /// Mark an item processed now and clear its error message.
    async fn mark_processed(&self, id: &str) -> Result<(), InvalidationError>;

    /// Record a handler failure: increment `retry_count`, store the error.
    async fn record_failure(&self, id: &str, error: &str) -> Result<(), InvalidationError>;

    /// Manually clear a frozen item: reset `retry_count` and the error so
    /// the next poll picks it up again. Returns `false` if the item is
    /// missing or already processed.
    async fn requeue(&self, id: &str) -> Result<bool, InvalidationError>;

    /// Delete processed items whose `processed_at` is before `cutoff`.
    /// Returns the number of rows removed.
    async fn delete_processed_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<u64, InvalidationError>;

    /// List frozen items for operational inspection.
    async fn list_frozen(
        &self,
        max_retries: u32,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InvalidationQueueItem>, InvalidationError>;

    /// Aggregate counts by state.
    async fn stats(&self, max_retries: u32) -> Result<QueueStats, InvalidationError>;
}
