//! In-memory queue storage for tests and single-instance deployments.

use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::InvalidationError;
use crate::queue::InvalidationQueueStorage;
use crate::types::{InvalidationQueueItem, QueueStats};

/// Queue storage backed by an in-process vector.
#[derive(Debug, Default)]
pub struct MemoryQueueStorage {
    items: Mutex<Vec<InvalidationQueueItem>>,
}

impl MemoryQueueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every item, for assertions in tests.
    pub fn all(&self) -> Vec<InvalidationQueueItem> {
        self.items.lock().expect("queue lock poisoned").clone()
    }
}

#[async_trait]
impl InvalidationQueueStorage for MemoryQueueStorage {
    async fn enqueue(&self, item: &InvalidationQueueItem) -> Result<(), InvalidationError> {
        self.items
            .lock()
            .expect("queue lock poisoned")
            .push(item.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<InvalidationQueueItem>, InvalidationError> {
        Ok(self
            .items
            .lock()
            .expect("queue lock poisoned")
            .iter()
            .find(|item| item.id == id)
            .cloned())
    }

    async fn fetch_pending(
        &self,
        limit: i64,
        max_retries: u32,
    ) -> Result<Vec<InvalidationQueueItem>, InvalidationError> {
        let items = self.items.lock().expect("queue lock poisoned");
        let mut pending: Vec<_> = items
            .iter()
            .filter(|item| !item.processed && item.retry_count < max_retries)
            .cloned()
            .collect();
        pending.sort_by_key(|item| item.invalidated_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_processed(&self, id: &str) -> Result<(), InvalidationError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            item.processed = true;
            item.processed_at = Some(OffsetDateTime::now_utc());
            item.error_message = None;
        }
        Ok(())
    }

    async fn record_failure(&self, id: &str, error: &str) -> Result<(), InvalidationError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            item.retry_count += 1;
            item.error_message = Some(error.to_string());
        }
        Ok(())
    }

    async fn requeue(&self, id: &str) -> Result<bool, InvalidationError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        match items.iter_mut().find(|item| item.id == id && !item.processed) {
            Some(item) => {
                item.retry_count = 0;
                item.error_message = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_processed_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<u64, InvalidationError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        let before = items.len();
        items.retain(|item| {
            !(item.processed && item.processed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - items.len()) as u64)
    }

    async fn list_frozen(
        &self,
        max_retries: u32,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InvalidationQueueItem>, InvalidationError> {
        let items = self.items.lock().expect("queue lock poisoned");
        let mut frozen: Vec<_> = items
            .iter()
            .filter(|item| !item.processed && item.retry_count >= max_retries)
            .cloned()
            .collect();
        frozen.sort_by_key(|item| item.invalidated_at);
        Ok(frozen
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn stats(&self, max_retries: u32) -> Result<QueueStats, InvalidationError> {
        let items = self.items.lock().expect("queue lock poisoned");
        let mut stats = QueueStats::default();
        for item in items.iter() {
            if item.processed {
                stats.processed += 1;
            } else if item.retry_count >= max_retries {
                stats.frozen += 1;
            } else {
                stats.pending += 1;
            }
        }
        Ok(stats)
    }
}
