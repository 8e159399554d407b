//! Producer-side entry points and process lifecycle helpers.

use std::sync::Arc;

use tracing::{debug, info, warn};

use vitalis_cache::{cache_key, CacheType};

use crate::error::InvalidationError;
use crate::processor::ProcessorHandle;
use crate::queue::InvalidationQueueStorage;
use crate::types::InvalidationQueueItem;

/// Enqueue one invalidation per cache type for a user's data.
///
/// Returns the number of items actually enqueued. A failed enqueue for
/// one type does not abort the rest; partial success is reported via the
/// count and per-type warnings.
pub async fn invalidate_user_data<Q>(
    queue: &Q,
    user_id: &str,
    types: &[CacheType],
) -> Result<u32, InvalidationError>
where
    Q: InvalidationQueueStorage + ?Sized,
{
    let mut enqueued = 0u32;
    for &ty in types {
        let key = cache_key(ty, user_id, None);
        let item = InvalidationQueueItem::new(&key, ty, Some(user_id.to_string()));
        match queue.enqueue(&item).await {
            Ok(()) => {
                debug!(cache_key = %key, cache_type = %ty.as_str(), "queued invalidation");
                enqueued += 1;
            }
            Err(e) => {
                warn!(cache_key = %key, error = %e, "failed to queue invalidation");
            }
        }
    }
    if enqueued == 0 && !types.is_empty() {
        return Err(InvalidationError::Storage(format!(
            "could not queue any invalidation for user {user_id}"
        )));
    }
    Ok(enqueued)
}

/// Enqueue invalidation for an order, plus the owning user's purchase
/// history when the user is known.
pub async fn invalidate_order_data<Q>(
    queue: &Q,
    order_id: &str,
    user_id: Option<&str>,
) -> Result<u32, InvalidationError>
where
    Q: InvalidationQueueStorage + ?Sized,
{
    let key = cache_key(CacheType::OrderDetails, order_id, None);
    let item = InvalidationQueueItem::new(
        &key,
        CacheType::OrderDetails,
        user_id.map(str::to_string),
    );
    queue.enqueue(&item).await?;
    debug!(cache_key = %key, "queued order invalidation");

    let mut enqueued = 1u32;
    if let Some(user) = user_id {
        enqueued += invalidate_user_data(queue, user, &[CacheType::PurchaseHistory]).await?;
    }
    Ok(enqueued)
}

/// Resolves when the process receives Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        // Without a signal handler there is nothing to wait for.
        return;
    }
    info!("shutdown signal received");
}

/// Run the processor until Ctrl+C, then stop it cleanly.
pub async fn run_until_shutdown(handle: ProcessorHandle) {
    shutdown_signal().await;
    handle.stop().await;
}

/// Convenience wrapper bundling queue access for callers that mutate
/// user data in several places.
pub struct InvalidationService<Q: InvalidationQueueStorage + ?Sized> {
    queue: Arc<Q>,
}

impl<Q: InvalidationQueueStorage + ?Sized> InvalidationService<Q> {
    pub fn new(queue: Arc<Q>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    pub async fn invalidate_user_data(
        &self,
        user_id: &str,
        types: &[CacheType],
    ) -> Result<u32, InvalidationError> {
        invalidate_user_data(self.queue.as_ref(), user_id, types).await
    }

    pub async fn invalidate_order_data(
        &self,
        order_id: &str,
        user_id: Option<&str>,
    ) -> Result<u32, InvalidationError> {
        invalidate_order_data(self.queue.as_ref(), order_id, user_id).await
    }
}
