//! Per-type cascade handlers.
//!
//! A cascade deletes the primary pattern for the mutated entity plus any
//! caches semantically derived from the same data. Every handler is
//! delete-only and idempotent — that invariant is what makes at-least-once
//! execution across racing processor instances safe, and new handlers must
//! preserve it.
//!
//! There is no partial credit: any failed underlying delete fails the
//! whole handler invocation, and the processor turns that into a retry.

use std::sync::Arc;

use async_trait::async_trait;

use vitalis_cache::{CacheManager, CacheType};

use crate::error::InvalidationError;
use crate::types::InvalidationQueueItem;

/// Seam between the processor and the cascade logic, so the processor is
/// testable with deterministic handlers.
#[async_trait]
pub trait InvalidationHandler: Send + Sync {
    /// Execute the cascade for one queue item.
    async fn handle(&self, item: &InvalidationQueueItem) -> Result<(), InvalidationError>;
}

/// Production handler: dispatches on the item's cache type and fans out
/// pattern deletes through the cache manager.
pub struct CascadeInvalidator {
    cache: Arc<CacheManager>,
}

impl CascadeInvalidator {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self { cache }
    }

    /// Delete every key matching each pattern; any store failure fails
    /// the whole cascade.
    async fn delete_patterns(&self, patterns: &[String]) -> Result<(), InvalidationError> {
        for pattern in patterns {
            self.cache.try_delete_pattern(pattern).await?;
        }
        Ok(())
    }

    fn entity_id<'a>(item: &'a InvalidationQueueItem) -> Result<&'a str, InvalidationError> {
        item.entity_id().ok_or_else(|| {
            InvalidationError::Internal(format!(
                "cannot determine entity id for key {}",
                item.cache_key
            ))
        })
    }

    /// The order identifier, always parsed out of the stored key.
    fn order_id(item: &InvalidationQueueItem) -> Result<&str, InvalidationError> {
        let rest = item
            .cache_key
            .strip_prefix(CacheType::OrderDetails.prefix())
            .unwrap_or(&item.cache_key);
        let id = rest.split(':').next().unwrap_or(rest);
        if id.is_empty() {
            return Err(InvalidationError::Internal(format!(
                "cannot parse order id from key {}",
                item.cache_key
            )));
        }
        Ok(id)
    }
}

#[async_trait]
impl InvalidationHandler for CascadeInvalidator {
    async fn handle(&self, item: &InvalidationQueueItem) -> Result<(), InvalidationError> {
        let Some(ty) = item.parsed_type() else {
            // Unregistered type: fall back to deleting the literal key.
            tracing::debug!(
                cache_type = %item.cache_type,
                key = %item.cache_key,
                "unknown cache type, deleting literal key"
            );
            self.cache.try_delete(&item.cache_key).await?;
            return Ok(());
        };

        match ty {
            CacheType::PurchaseHistory => {
                let user = Self::entity_id(item)?;
                self.delete_patterns(&[
                    CacheType::PurchaseHistory.entity_pattern(user),
                    CacheType::Analytics.entity_pattern(user),
                ])
                .await
            }
            // Appointments are embedded in purchase history views, so both
            // caches go.
            CacheType::Appointments => {
                let user = Self::entity_id(item)?;
                self.delete_patterns(&[
                    CacheType::Appointments.entity_pattern(user),
                    CacheType::PurchaseHistory.entity_pattern(user),
                ])
                .await
            }
            CacheType::Analytics => {
                let user = Self::entity_id(item)?;
                self.delete_patterns(&[CacheType::Analytics.entity_pattern(user)])
                    .await
            }
            CacheType::OrderDetails => {
                let order = Self::order_id(item)?;
                let mut patterns = vec![CacheType::OrderDetails.entity_pattern(order)];
                if let Some(user) = item.user_id.as_deref() {
                    patterns.push(CacheType::PurchaseHistory.entity_pattern(user));
                }
                self.delete_patterns(&patterns).await
            }
            CacheType::UserProfile => {
                let user = Self::entity_id(item)?;
                self.delete_patterns(&[CacheType::UserProfile.entity_pattern(user)])
                    .await
            }
            CacheType::SwellCustomer => {
                let rest = item
                    .cache_key
                    .strip_prefix(CacheType::SwellCustomer.prefix())
                    .unwrap_or(&item.cache_key);
                let id = rest.split(':').next().unwrap_or(rest);
                if id.is_empty() {
                    return Err(InvalidationError::Internal(format!(
                        "cannot parse customer id from key {}",
                        item.cache_key
                    )));
                }
                self.delete_patterns(&[CacheType::SwellCustomer.entity_pattern(id)])
                    .await
            }
            // No dependent caches; the literal key is enough.
            CacheType::SystemStats | CacheType::SecurityEvents => {
                self.cache.try_delete(&item.cache_key).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use vitalis_cache::CacheStore;

    async fn seeded_cache() -> Arc<CacheManager> {
        let cache = Arc::new(CacheManager::without_audit(CacheStore::memory()));
        for key in [
            "appointments:u1",
            "appointments:u1:upcoming",
            "purchase_history:u1",
            "purchase_history:u1:recent",
            "analytics:u1",
            "user_profile:u1",
            "appointments:u2",
            "purchase_history:u2",
            "order_details:ord-9",
            "order_details:ord-9:items",
            "swell_customer:cus-5",
            "system_stats:global",
        ] {
            assert!(cache.set(key, &"payload", None).await);
        }
        cache
    }

    #[tokio::test]
    async fn test_appointments_cascade_takes_purchase_history_too() {
        let cache = seeded_cache().await;
        let handler = CascadeInvalidator::new(cache.clone());

        let item = InvalidationQueueItem::new(
            "appointments:u1",
            CacheType::Appointments,
            Some("u1".into()),
        );
        handler.handle(&item).await.unwrap();

        assert!(!cache.exists("appointments:u1").await);
        assert!(!cache.exists("appointments:u1:upcoming").await);
        assert!(!cache.exists("purchase_history:u1").await);
        assert!(!cache.exists("purchase_history:u1:recent").await);
        // Unrelated caches are untouched.
        assert!(cache.exists("analytics:u1").await);
        assert!(cache.exists("appointments:u2").await);
        assert!(cache.exists("purchase_history:u2").await);
    }

    #[tokio::test]
    async fn test_purchase_history_cascade_takes_analytics() {
        let cache = seeded_cache().await;
        let handler = CascadeInvalidator::new(cache.clone());

        let item = InvalidationQueueItem::new(
            "purchase_history:u1",
            CacheType::PurchaseHistory,
            Some("u1".into()),
        );
        handler.handle(&item).await.unwrap();

        assert!(!cache.exists("purchase_history:u1").await);
        assert!(!cache.exists("analytics:u1").await);
        assert!(cache.exists("appointments:u1").await);
    }

    #[tokio::test]
    async fn test_analytics_cascade_is_narrow() {
        let cache = seeded_cache().await;
        let handler = CascadeInvalidator::new(cache.clone());

        let item =
            InvalidationQueueItem::new("analytics:u1", CacheType::Analytics, Some("u1".into()));
        handler.handle(&item).await.unwrap();

        assert!(!cache.exists("analytics:u1").await);
        assert!(cache.exists("purchase_history:u1").await);
        assert!(cache.exists("appointments:u1").await);
    }

    #[tokio::test]
    async fn test_order_details_cascade_parses_order_and_user() {
        let cache = seeded_cache().await;
        let handler = CascadeInvalidator::new(cache.clone());

        let item = InvalidationQueueItem::new(
            "order_details:ord-9",
            CacheType::OrderDetails,
            Some("u1".into()),
        );
        handler.handle(&item).await.unwrap();

        assert!(!cache.exists("order_details:ord-9").await);
        assert!(!cache.exists("order_details:ord-9:items").await);
        assert!(!cache.exists("purchase_history:u1").await);
        assert!(cache.exists("purchase_history:u2").await);
    }

    #[tokio::test]
    async fn test_order_details_without_user_skips_purchase_history() {
        let cache = seeded_cache().await;
        let handler = CascadeInvalidator::new(cache.clone());

        let item =
            InvalidationQueueItem::new("order_details:ord-9:items", CacheType::OrderDetails, None);
        handler.handle(&item).await.unwrap();

        assert!(!cache.exists("order_details:ord-9").await);
        assert!(cache.exists("purchase_history:u1").await);
    }

    #[tokio::test]
    async fn test_swell_customer_cascade() {
        let cache = seeded_cache().await;
        let handler = CascadeInvalidator::new(cache.clone());

        let item =
            InvalidationQueueItem::new("swell_customer:cus-5", CacheType::SwellCustomer, None);
        handler.handle(&item).await.unwrap();

        assert!(!cache.exists("swell_customer:cus-5").await);
    }

    #[tokio::test]
    async fn test_unknown_type_deletes_literal_key() {
        let cache = seeded_cache().await;
        let handler = CascadeInvalidator::new(cache.clone());

        let mut item =
            InvalidationQueueItem::new("system_stats:global", CacheType::SystemStats, None);
        item.cache_type = "retired_type".into();
        handler.handle(&item).await.unwrap();

        assert!(!cache.exists("system_stats:global").await);
    }

    #[tokio::test]
    async fn test_unparseable_entity_is_an_error() {
        let cache = seeded_cache().await;
        let handler = CascadeInvalidator::new(cache.clone());

        let item = InvalidationQueueItem::new("user_profile:", CacheType::UserProfile, None);
        assert!(handler.handle(&item).await.is_err());
    }

    #[tokio::test]
    async fn test_cascade_is_idempotent() {
        let cache = seeded_cache().await;
        let handler = CascadeInvalidator::new(cache.clone());

        let item = InvalidationQueueItem::new(
            "appointments:u1",
            CacheType::Appointments,
            Some("u1".into()),
        );
        handler.handle(&item).await.unwrap();
        // A duplicate delivery (multi-instance race) must also succeed.
        handler.handle(&item).await.unwrap();
        assert!(!cache.exists("appointments:u1").await);
    }
}
