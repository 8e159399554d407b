//! Timer-driven invalidation processor.
//!
//! Polls the queue on a fixed interval, dispatches each item to the
//! cascade handler, updates item state, and garbage-collects processed
//! rows after the retention window. A single in-process `AtomicBool`
//! bounds concurrency to one in-flight batch: a tick that fires while a
//! batch is running is skipped entirely, not queued.
//!
//! This flag is not a distributed lock. Two processes can race on the
//! same rows; cascades are idempotent deletes, so at-least-once execution
//! is accepted instead of paying for distributed coordination.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::cascade::InvalidationHandler;
use crate::queue::InvalidationQueueStorage;

/// Processor tuning knobs.
///
/// `poll_interval` is the eventual-consistency bound: an enqueued
/// invalidation is applied within one interval plus processing time.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// How often to poll the queue.
    pub poll_interval: Duration,

    /// Maximum items per batch.
    pub batch_size: i64,

    /// Items at or above this retry count are frozen.
    pub max_retries: u32,

    /// How long processed rows are retained before cleanup.
    pub retain_processed_for: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
            max_retries: 3,
            retain_processed_for: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl ProcessorConfig {
    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }
}

/// Counters from one completed processing cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Items whose cascade succeeded.
    pub processed: u32,
    /// Items whose cascade failed (retry recorded).
    pub failed: u32,
    /// Items whose cascade ran but whose state could not be recorded;
    /// they stay pending and are picked up again next cycle.
    pub skipped: u32,
    /// Old processed rows removed by the cleanup pass.
    pub cleaned: u64,
}

impl BatchSummary {
    fn is_trivial(&self) -> bool {
        self.processed == 0 && self.failed == 0 && self.skipped == 0 && self.cleaned == 0
    }
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous batch was still in flight; no work was done.
    Skipped,
    Completed(BatchSummary),
}

/// The queue worker. Generic over storage and handler so tests can plug
/// in deterministic implementations.
pub struct InvalidationProcessor<Q, H>
where
    Q: InvalidationQueueStorage,
    H: InvalidationHandler,
{
    queue: Arc<Q>,
    handler: Arc<H>,
    config: ProcessorConfig,
    in_flight: AtomicBool,
}

impl<Q, H> InvalidationProcessor<Q, H>
where
    Q: InvalidationQueueStorage + 'static,
    H: InvalidationHandler + 'static,
{
    pub fn new(queue: Arc<Q>, handler: Arc<H>, config: ProcessorConfig) -> Self {
        Self {
            queue,
            handler,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run one poll cycle, unless a previous one is still in flight.
    pub async fn tick(&self) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("previous invalidation batch still running, skipping tick");
            return TickOutcome::Skipped;
        }

        // Released on drop, so the flag clears even if a handler panics
        // and the unwind tears down this future.
        let _guard = InFlightGuard(&self.in_flight);
        TickOutcome::Completed(self.run_cycle().await)
    }

    async fn run_cycle(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();

        match self
            .queue
            .fetch_pending(self.config.batch_size, self.config.max_retries)
            .await
        {
            Ok(items) => {
                for item in items {
                    match self.handler.handle(&item).await {
                        Ok(()) => match self.queue.mark_processed(&item.id).await {
                            Ok(()) => summary.processed += 1,
                            Err(e) => {
                                warn!(item_id = %item.id, error = %e, "failed to mark item processed");
                                summary.skipped += 1;
                            }
                        },
                        Err(e) => {
                            let message = e.to_string();
                            warn!(
                                item_id = %item.id,
                                cache_key = %item.cache_key,
                                retry_count = item.retry_count,
                                error = %message,
                                "invalidation cascade failed"
                            );
                            if let Err(e) = self.queue.record_failure(&item.id, &message).await {
                                warn!(item_id = %item.id, error = %e, "failed to record failure");
                            }
                            summary.failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "failed to fetch pending invalidations");
            }
        }

        // Cleanup runs even when the batch itself failed.
        let cutoff = OffsetDateTime::now_utc() - self.config.retain_processed_for;
        match self.queue.delete_processed_before(cutoff).await {
            Ok(cleaned) => summary.cleaned = cleaned,
            Err(e) => warn!(error = %e, "queue cleanup pass failed"),
        }

        if !summary.is_trivial() {
            info!(
                processed = summary.processed,
                errors = summary.failed,
                skipped = summary.skipped,
                cleaned = summary.cleaned,
                "invalidation batch complete"
            );
        }

        summary
    }

    /// Spawn the polling loop. The returned handle stops it.
    pub fn start(self: Arc<Self>) -> ProcessorHandle {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let processor = Arc::clone(&self);
        let loop_stop = Arc::clone(&stop_flag);
        let loop_notify = Arc::clone(&notify);

        let task_handle = tokio::spawn(async move {
            let mut ticker = interval(processor.config.poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if loop_stop.load(Ordering::SeqCst) {
                            break;
                        }
                        let _ = processor.tick().await;
                    }
                    _ = loop_notify.notified() => break,
                }
            }
            info!("invalidation processor stopped");
        });

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "invalidation processor started"
        );

        ProcessorHandle {
            stop_flag,
            notify,
            task_handle: Some(task_handle),
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle controlling a running processor loop.
///
/// `stop` clears the timer; an in-flight batch is allowed to complete.
pub struct ProcessorHandle {
    stop_flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ProcessorHandle {
    /// Stop the polling loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the loop is still scheduled.
    pub fn is_running(&self) -> bool {
        !self.stop_flag.load(Ordering::SeqCst)
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use vitalis_cache::{CacheManager, CacheStore, CacheType};

    use super::*;
    use crate::cascade::CascadeInvalidator;
    use crate::error::InvalidationError;
    use crate::memory::MemoryQueueStorage;
    use crate::types::{InvalidationQueueItem, QueueStats};

    struct FailingHandler;

    #[async_trait]
    impl InvalidationHandler for FailingHandler {
        async fn handle(&self, _item: &InvalidationQueueItem) -> Result<(), InvalidationError> {
            Err(InvalidationError::Cache("redis unreachable".into()))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl InvalidationHandler for SlowHandler {
        async fn handle(&self, _item: &InvalidationQueueItem) -> Result<(), InvalidationError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    struct OkHandler;

    #[async_trait]
    impl InvalidationHandler for OkHandler {
        async fn handle(&self, _item: &InvalidationQueueItem) -> Result<(), InvalidationError> {
            Ok(())
        }
    }

    struct PanicOnceHandler {
        tripped: AtomicBool,
    }

    #[async_trait]
    impl InvalidationHandler for PanicOnceHandler {
        async fn handle(&self, _item: &InvalidationQueueItem) -> Result<(), InvalidationError> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("handler exploded");
            }
            Ok(())
        }
    }

    /// Queue whose bookkeeping writes fail while reads keep working.
    struct MarkFailingQueue {
        inner: MemoryQueueStorage,
    }

    #[async_trait]
    impl InvalidationQueueStorage for MarkFailingQueue {
        async fn enqueue(&self, item: &InvalidationQueueItem) -> Result<(), InvalidationError> {
            self.inner.enqueue(item).await
        }

        async fn get(&self, id: &str) -> Result<Option<InvalidationQueueItem>, InvalidationError> {
            self.inner.get(id).await
        }

        async fn fetch_pending(
            &self,
            limit: i64,
            max_retries: u32,
        ) -> Result<Vec<InvalidationQueueItem>, InvalidationError> {
            self.inner.fetch_pending(limit, max_retries).await
        }

        async fn mark_processed(&self, _id: &str) -> Result<(), InvalidationError> {
            Err(InvalidationError::Storage("connection reset".into()))
        }

        async fn record_failure(&self, id: &str, error: &str) -> Result<(), InvalidationError> {
            self.inner.record_failure(id, error).await
        }

        async fn requeue(&self, id: &str) -> Result<bool, InvalidationError> {
            self.inner.requeue(id).await
        }

        async fn delete_processed_before(
            &self,
            cutoff: OffsetDateTime,
        ) -> Result<u64, InvalidationError> {
            self.inner.delete_processed_before(cutoff).await
        }

        async fn list_frozen(
            &self,
            max_retries: u32,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<InvalidationQueueItem>, InvalidationError> {
            self.inner.list_frozen(max_retries, limit, offset).await
        }

        async fn stats(&self, max_retries: u32) -> Result<QueueStats, InvalidationError> {
            self.inner.stats(max_retries).await
        }
    }

    fn processor<H: InvalidationHandler + 'static>(
        queue: Arc<MemoryQueueStorage>,
        handler: H,
    ) -> Arc<InvalidationProcessor<MemoryQueueStorage, H>> {
        Arc::new(InvalidationProcessor::new(
            queue,
            Arc::new(handler),
            ProcessorConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_cascade_applies_within_one_tick() {
        let cache = Arc::new(CacheManager::without_audit(CacheStore::memory()));
        for key in ["appointments:u1", "purchase_history:u1", "analytics:u1"] {
            assert!(cache.set(key, &"payload", None).await);
        }

        let queue = Arc::new(MemoryQueueStorage::new());
        queue
            .enqueue(&InvalidationQueueItem::new(
                "appointments:u1",
                CacheType::Appointments,
                Some("u1".into()),
            ))
            .await
            .unwrap();

        let processor = processor(queue.clone(), CascadeInvalidator::new(cache.clone()));
        let outcome = processor.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Completed(BatchSummary {
                processed: 1,
                ..BatchSummary::default()
            })
        );

        assert!(!cache.exists("appointments:u1").await);
        assert!(!cache.exists("purchase_history:u1").await);
        assert!(cache.exists("analytics:u1").await);

        let stored = queue.all();
        assert!(stored[0].processed);
        assert!(stored[0].processed_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_ceiling_freezes_the_item() {
        let queue = Arc::new(MemoryQueueStorage::new());
        let item =
            InvalidationQueueItem::new("appointments:u1", CacheType::Appointments, Some("u1".into()));
        queue.enqueue(&item).await.unwrap();

        let processor = processor(queue.clone(), FailingHandler);

        for expected_retries in 1..=3u32 {
            let outcome = processor.tick().await;
            assert!(matches!(
                outcome,
                TickOutcome::Completed(BatchSummary { failed: 1, .. })
            ));
            let stored = queue.get(&item.id).await.unwrap().unwrap();
            assert_eq!(stored.retry_count, expected_retries);
            assert_eq!(stored.error_message.as_deref(), Some("cache error: redis unreachable"));
        }

        // Fourth cycle: the frozen item is excluded from selection.
        let outcome = processor.tick().await;
        assert_eq!(outcome, TickOutcome::Completed(BatchSummary::default()));
        let stored = queue.get(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 3);
        assert!(!stored.processed);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let queue = Arc::new(MemoryQueueStorage::new());
        queue
            .enqueue(&InvalidationQueueItem::new(
                "appointments:u1",
                CacheType::Appointments,
                Some("u1".into()),
            ))
            .await
            .unwrap();

        let processor = processor(queue.clone(), SlowHandler);

        let background = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.tick().await })
        };

        // Let the first tick claim the in-flight flag.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.tick().await, TickOutcome::Skipped);

        let first = background.await.unwrap();
        assert!(matches!(
            first,
            TickOutcome::Completed(BatchSummary { processed: 1, .. })
        ));

        // With the flag released the processor works again.
        assert!(matches!(processor.tick().await, TickOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_cleanup_pass_runs_with_empty_batch() {
        let queue = Arc::new(MemoryQueueStorage::new());
        let old = InvalidationQueueItem::new("analytics:u1", CacheType::Analytics, None);
        let recent = InvalidationQueueItem::new("analytics:u2", CacheType::Analytics, None);
        queue.enqueue(&old).await.unwrap();
        queue.enqueue(&recent).await.unwrap();
        queue.mark_processed(&old.id).await.unwrap();
        queue.mark_processed(&recent.id).await.unwrap();

        // Age one processed_at past the retention window.
        {
            let mut items = queue.all();
            items[0].processed_at =
                Some(OffsetDateTime::now_utc() - time::Duration::hours(25));
            // MemoryQueueStorage has no update API for tests; re-enqueue.
            let fresh = MemoryQueueStorage::new();
            for item in &items {
                fresh.enqueue(item).await.unwrap();
            }
            let processor = processor(Arc::new(fresh), FailingHandler);
            let outcome = processor.tick().await;
            assert_eq!(
                outcome,
                TickOutcome::Completed(BatchSummary {
                    cleaned: 1,
                    ..BatchSummary::default()
                })
            );
        }
    }

    #[tokio::test]
    async fn test_unrecorded_items_are_counted_as_skipped() {
        let queue = Arc::new(MarkFailingQueue {
            inner: MemoryQueueStorage::new(),
        });
        let item =
            InvalidationQueueItem::new("analytics:u1", CacheType::Analytics, Some("u1".into()));
        queue.enqueue(&item).await.unwrap();

        let processor = Arc::new(InvalidationProcessor::new(
            Arc::clone(&queue),
            Arc::new(OkHandler),
            ProcessorConfig::default(),
        ));

        let outcome = processor.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Completed(BatchSummary {
                skipped: 1,
                ..BatchSummary::default()
            })
        );

        // The item stays pending and is fetched again next cycle.
        let stored = queue.get(&item.id).await.unwrap().unwrap();
        assert!(!stored.processed);
        assert_eq!(queue.fetch_pending(50, 3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_wedge_the_processor() {
        let queue = Arc::new(MemoryQueueStorage::new());
        queue
            .enqueue(&InvalidationQueueItem::new(
                "analytics:u1",
                CacheType::Analytics,
                Some("u1".into()),
            ))
            .await
            .unwrap();

        let processor = Arc::new(InvalidationProcessor::new(
            queue.clone(),
            Arc::new(PanicOnceHandler {
                tripped: AtomicBool::new(false),
            }),
            ProcessorConfig::default(),
        ));

        let first = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.tick().await }).await
        };
        assert!(first.is_err());

        // The in-flight flag was released on unwind, so the next tick
        // runs a real batch instead of reporting Skipped forever.
        let outcome = processor.tick().await;
        assert!(matches!(
            outcome,
            TickOutcome::Completed(BatchSummary { processed: 1, .. })
        ));
        assert!(queue.all()[0].processed);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let cache = Arc::new(CacheManager::without_audit(CacheStore::memory()));
        assert!(cache.set("user_profile:u1", &"payload", None).await);

        let queue = Arc::new(MemoryQueueStorage::new());
        queue
            .enqueue(&InvalidationQueueItem::new(
                "user_profile:u1",
                CacheType::UserProfile,
                Some("u1".into()),
            ))
            .await
            .unwrap();

        let processor = Arc::new(InvalidationProcessor::new(
            queue.clone(),
            Arc::new(CascadeInvalidator::new(cache.clone())),
            ProcessorConfig::default().with_poll_interval(Duration::from_millis(20)),
        ));

        let handle = Arc::clone(&processor).start();
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        assert!(!cache.exists("user_profile:u1").await);
        assert!(queue.all()[0].processed);
    }
}
