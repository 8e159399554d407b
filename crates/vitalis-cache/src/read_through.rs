//! Read-through helper: the sanctioned read path for cached user data.
//!
//! Callers never hand-roll get/set sequences; they describe how to compute
//! the value from the source of truth and this helper handles lookup,
//! population and TTL selection.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::manager::CacheManager;
use crate::types::{CacheType, cache_key};

/// Look up `(ty, id, suffix)` in the cache; on miss, invoke `compute`,
/// store the result with the type's configured TTL, and return it.
///
/// A failed cache write never fails the read: the computed value is
/// returned regardless, and only `compute`'s own error propagates.
pub async fn cache_user_data<T, E, F, Fut>(
    cache: &CacheManager,
    ty: CacheType,
    id: &str,
    suffix: Option<&str>,
    compute: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let key = cache_key(ty, id, suffix);

    if let Some(cached) = cache.get::<T>(&key).await {
        return Ok(cached);
    }

    let value = compute().await?;

    if !cache.set(&key, &value, Some(ty.ttl_seconds())).await {
        tracing::debug!(key = %key, "computed value not cached");
    }

    Ok(value)
}
