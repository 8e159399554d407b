//! Cache manager: the public surface of the cache layer.
//!
//! Every operation is a safe no-op when the store client is disabled or
//! the cache service errors: reads report a miss, writes report `false`,
//! counts report `0`. Callers must never be able to distinguish "miss"
//! from "cache down" — they always recompute from the source of truth.
//!
//! Mutating operations emit a best-effort audit record on a spawned task;
//! audit failures are discarded and never affect the primary operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::audit::{CacheAuditSink, CacheErrorRecord, CacheOperationRecord, NoopAuditSink};
use crate::codec::{self, Decoded};
use crate::error::Result;
use crate::store::CacheStore;

/// Health classification for the cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of a cache health probe.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheHealth {
    pub status: HealthState,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Round-trip latency above this is classified as degraded.
const HEALTHY_LATENCY_MS: u64 = 100;

/// Public get/set/delete surface over the store client and codec.
#[derive(Clone)]
pub struct CacheManager {
    store: CacheStore,
    audit: Arc<dyn CacheAuditSink>,
}

impl CacheManager {
    /// Create a manager over the given store and audit sink.
    pub fn new(store: CacheStore, audit: Arc<dyn CacheAuditSink>) -> Self {
        Self { store, audit }
    }

    /// Create a manager that drops audit records.
    pub fn without_audit(store: CacheStore) -> Self {
        Self::new(store, Arc::new(NoopAuditSink))
    }

    /// The underlying store client.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Store an encoded value, optionally with a TTL.
    ///
    /// Returns `true` only on a confirmed write.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: Option<u64>) -> bool {
        let encoded = match codec::encode(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode cache value");
                self.audit_error("set", key, &e.to_string(), Some(format!("{e:?}")));
                return false;
            }
        };

        let size = encoded.bytes.len();
        let compressed = encoded.compressed;

        match self.store.set(key, encoded.bytes, ttl_seconds).await {
            Ok(true) => {
                tracing::debug!(key = %key, size, compressed, ttl = ?ttl_seconds, "cache set");
                self.audit_operation(
                    "set",
                    key,
                    json!({ "size": size, "compressed": compressed, "ttl": ttl_seconds }),
                );
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache set failed");
                self.audit_error("set", key, &e.to_string(), Some(format!("{e:?}")));
                false
            }
        }
    }

    /// Fetch and decode a value. Returns `None` on miss, corruption, or
    /// any lower-layer failure.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache get failed");
                self.audit_error("get", key, &e.to_string(), Some(format!("{e:?}")));
                return None;
            }
        };

        match codec::decode::<T>(&bytes) {
            Decoded::Value(envelope) => {
                tracing::debug!(key = %key, "cache hit");
                Some(envelope.data)
            }
            Decoded::Corrupt => {
                tracing::warn!(key = %key, "corrupt cache entry, deleting");
                self.audit_error("get", key, "corrupt envelope", None);
                let _ = self.store.del(&[key.to_string()]).await;
                None
            }
        }
    }

    /// Delete a single key.
    pub async fn delete(&self, key: &str) -> bool {
        self.try_delete(key).await.unwrap_or_else(|e| {
            tracing::warn!(key = %key, error = %e, "cache delete failed");
            self.audit_error("delete", key, &e.to_string(), Some(format!("{e:?}")));
            false
        })
    }

    /// Fallible delete, for callers (cascade handlers) that must convert
    /// a store failure into a retry.
    pub async fn try_delete(&self, key: &str) -> Result<bool> {
        let removed = self.store.del(&[key.to_string()]).await? > 0;
        if removed {
            self.audit_operation("delete", key, json!({}));
        }
        Ok(removed)
    }

    /// Delete every key matching a glob pattern. Returns the number of
    /// keys actually removed; `0` is a valid outcome, not an error.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        self.try_delete_pattern(pattern).await.unwrap_or_else(|e| {
            tracing::warn!(pattern = %pattern, error = %e, "cache pattern delete failed");
            self.audit_error("delete_pattern", pattern, &e.to_string(), Some(format!("{e:?}")));
            0
        })
    }

    /// Fallible pattern delete, for cascade handlers.
    pub async fn try_delete_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.store.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.del(&keys).await?;
        tracing::debug!(pattern = %pattern, removed, "cache pattern delete");
        self.audit_operation("delete_pattern", pattern, json!({ "removed": removed }));
        Ok(removed)
    }

    /// Whether a key currently exists.
    pub async fn exists(&self, key: &str) -> bool {
        self.store.exists(key).await.unwrap_or_else(|e| {
            tracing::warn!(key = %key, error = %e, "cache exists failed");
            false
        })
    }

    /// Remaining TTL in seconds (Redis semantics: `-2` missing, `-1` no
    /// expiry).
    pub async fn get_ttl(&self, key: &str) -> i64 {
        self.store.ttl(key).await.unwrap_or_else(|e| {
            tracing::warn!(key = %key, error = %e, "cache ttl failed");
            -2
        })
    }

    /// Reset a key's TTL.
    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> bool {
        self.store.expire(key, ttl_seconds).await.unwrap_or_else(|e| {
            tracing::warn!(key = %key, error = %e, "cache expire failed");
            false
        })
    }

    /// Batched get. Corrupt entries are deleted and omitted from the map.
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[String]) -> HashMap<String, T> {
        let values = match self.store.mget(keys).await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(error = %e, "cache mget failed");
                return HashMap::new();
            }
        };

        let mut map = HashMap::new();
        for (key, bytes) in keys.iter().zip(values) {
            let Some(bytes) = bytes else { continue };
            match codec::decode::<T>(&bytes) {
                Decoded::Value(envelope) => {
                    map.insert(key.clone(), envelope.data);
                }
                Decoded::Corrupt => {
                    tracing::warn!(key = %key, "corrupt cache entry in mget, deleting");
                    let _ = self.store.del(std::slice::from_ref(key)).await;
                }
            }
        }
        map
    }

    /// Batched set; fails atomically as a group.
    pub async fn mset<T: Serialize>(&self, entries: &[(String, T, Option<u64>)]) -> bool {
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value, ttl) in entries {
            match codec::encode(value) {
                Ok(payload) => encoded.push((key.clone(), payload.bytes, *ttl)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to encode mset entry");
                    self.audit_error("mset", key, &e.to_string(), Some(format!("{e:?}")));
                    return false;
                }
            }
        }

        match self.store.mset(&encoded).await {
            Ok(true) => {
                self.audit_operation("mset", "(batch)", json!({ "entries": encoded.len() }));
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(error = %e, "cache mset failed");
                self.audit_error("mset", "(batch)", &e.to_string(), Some(format!("{e:?}")));
                false
            }
        }
    }

    /// Round-trip a throwaway key and classify the result.
    ///
    /// `< 100 ms` healthy, slower degraded; a value mismatch, store error
    /// or disabled store is unhealthy. Never raises.
    pub async fn health_check(&self) -> CacheHealth {
        let probe_key = format!("health:check:{}", uuid::Uuid::new_v4());
        let probe_value = b"ok".to_vec();
        let started = Instant::now();

        let outcome = self.probe(&probe_key, probe_value).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                let status = if latency_ms < HEALTHY_LATENCY_MS {
                    HealthState::Healthy
                } else {
                    HealthState::Degraded
                };
                CacheHealth {
                    status,
                    latency_ms,
                    error: None,
                }
            }
            Err(message) => CacheHealth {
                status: HealthState::Unhealthy,
                latency_ms,
                error: Some(message),
            },
        }
    }

    async fn probe(&self, key: &str, value: Vec<u8>) -> std::result::Result<(), String> {
        let written = self
            .store
            .set(key, value.clone(), Some(10))
            .await
            .map_err(|e| e.to_string())?;
        if !written {
            return Err("write not confirmed (store disabled)".to_string());
        }

        let read = self.store.get(key).await.map_err(|e| e.to_string())?;
        let _ = self.store.del(&[key.to_string()]).await;

        match read {
            Some(bytes) if bytes == value => Ok(()),
            Some(_) => Err("probe value mismatch".to_string()),
            None => Err("probe value missing on read-back".to_string()),
        }
    }

    fn audit_operation(&self, operation: &str, cache_key: &str, metadata: serde_json::Value) {
        let sink = Arc::clone(&self.audit);
        let record = CacheOperationRecord::new(operation, cache_key, metadata);
        tokio::spawn(async move {
            if let Err(e) = sink.log_operation(record).await {
                tracing::debug!(error = %e, "audit operation record dropped");
            }
        });
    }

    fn audit_error(&self, operation: &str, cache_key: &str, message: &str, stack: Option<String>) {
        let sink = Arc::clone(&self.audit);
        let mut record = CacheErrorRecord::new(operation, cache_key, message);
        if let Some(stack) = stack {
            record = record.with_error_stack(stack);
        }
        tokio::spawn(async move {
            if let Err(e) = sink.log_error(record).await {
                tracing::debug!(error = %e, "audit error record dropped");
            }
        });
    }
}
