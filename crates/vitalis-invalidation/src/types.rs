use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use vitalis_cache::CacheType;

/// A durable invalidation request.
///
/// Created (append-only) by any component that mutates data backing a
/// cache entry; mutated only by the processor, which marks items
/// processed, increments `retry_count` and attaches `error_message`.
/// `retry_count` is monotonically non-decreasing; items at or above the
/// retry ceiling are frozen — excluded from polling but retained for
/// operational inspection until manually requeued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationQueueItem {
    pub id: String,

    /// The key that was written when the entry was cached.
    pub cache_key: String,

    /// Cache type as stored; parsed to [`CacheType`] for dispatch. Kept as
    /// a string so rows written by older or newer producers still flow
    /// through the default single-key handler.
    pub cache_type: String,

    /// Owning user, when the type is user-scoped.
    pub user_id: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub invalidated_at: OffsetDateTime,

    pub processed: bool,

    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,

    pub retry_count: u32,

    pub error_message: Option<String>,
}

impl InvalidationQueueItem {
    /// Create a fresh pending item.
    pub fn new(cache_key: impl Into<String>, cache_type: CacheType, user_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            cache_key: cache_key.into(),
            cache_type: cache_type.as_str().to_string(),
            user_id,
            invalidated_at: OffsetDateTime::now_utc(),
            processed: false,
            processed_at: None,
            retry_count: 0,
            error_message: None,
        }
    }

    /// The parsed cache type, if the stored string is in the registry.
    pub fn parsed_type(&self) -> Option<CacheType> {
        self.cache_type.parse().ok()
    }

    /// The entity identifier this item targets: the explicit `user_id`
    /// when present, otherwise the segment of `cache_key` after the
    /// type's prefix (up to any suffix separator).
    pub fn entity_id(&self) -> Option<&str> {
        if let Some(user_id) = self.user_id.as_deref() {
            return Some(user_id);
        }
        let ty = self.parsed_type()?;
        let rest = self.cache_key.strip_prefix(ty.prefix())?;
        let id = rest.split(':').next().unwrap_or(rest);
        (!id.is_empty()).then_some(id)
    }
}

/// Aggregate queue statistics for operators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Unprocessed items still eligible for polling.
    pub pending: u32,
    /// Unprocessed items at or above the retry ceiling.
    pub frozen: u32,
    /// Processed items awaiting cleanup.
    pub processed: u32,
}
