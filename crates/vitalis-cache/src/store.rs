//! Cache store client: a thin adapter over the remote key-value service.
//!
//! ## Backends
//!
//! - **Disabled**: permanent no-op mode, entered when configuration is
//!   incomplete or the pool cannot be constructed. Operations return benign
//!   defaults for the process lifetime; there are no reconnection attempts.
//! - **Memory**: single-instance DashMap backend with TTL and glob support,
//!   used by tests and local development.
//! - **Redis**: deadpool-backed connection pool against the shared cache
//!   service.
//!
//! ## Graceful Degradation
//!
//! Construction never fails. The cache is an accelerator in front of the
//! relational source of truth; a missing or unreachable store degrades
//! performance, never correctness.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::config::CacheStoreConfig;
use crate::error::{CacheError, Result};

/// A raw entry in the memory backend.
#[derive(Debug, Clone)]
struct MemoryEntry {
    data: Vec<u8>,
    /// Absolute expiry deadline; `None` means no expiry.
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory store backend with Redis-compatible TTL semantics.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    /// Look up a live entry, dropping it if it has expired.
    fn live(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.data.clone()),
            Some(entry) => {
                drop(entry);
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }
}

/// Thin client over the remote cache service.
#[derive(Clone)]
pub enum CacheStore {
    /// Permanent no-op mode.
    Disabled,
    /// Single-instance in-memory backend.
    Memory(MemoryStore),
    /// Shared Redis backend.
    Redis { pool: Pool },
}

impl CacheStore {
    /// Create a disabled store.
    pub fn disabled() -> Self {
        CacheStore::Disabled
    }

    /// Create an in-memory store.
    pub fn memory() -> Self {
        CacheStore::Memory(MemoryStore::default())
    }

    /// Connect to the configured Redis service.
    ///
    /// Never fails: incomplete configuration, pool construction failure or
    /// an unreachable server all produce a [`CacheStore::Disabled`] client
    /// after logging why.
    pub async fn connect(config: &CacheStoreConfig) -> Self {
        let Some(url) = config.redis_url() else {
            tracing::warn!(
                "cache store configuration incomplete (endpoint/token missing), entering disabled mode"
            );
            return CacheStore::Disabled;
        };

        let mut redis_config = deadpool_redis::Config::from_url(&url);
        let pool_config = redis_config.pool.get_or_insert_with(Default::default);
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.recycle = Some(Duration::from_millis(config.timeout_ms));

        let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!(error = %e, "failed to create cache pool, entering disabled mode");
                return CacheStore::Disabled;
            }
        };

        match pool.get().await {
            Ok(_) => {
                tracing::info!("connected to cache store");
                CacheStore::Redis { pool }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to connect to cache store, entering disabled mode");
                CacheStore::Disabled
            }
        }
    }

    /// Whether this store is in permanent disabled mode.
    pub fn is_disabled(&self) -> bool {
        matches!(self, CacheStore::Disabled)
    }

    /// Backend name for logs and health reports.
    pub fn mode(&self) -> &'static str {
        match self {
            CacheStore::Disabled => "disabled",
            CacheStore::Memory(_) => "memory",
            CacheStore::Redis { .. } => "redis",
        }
    }

    async fn conn(pool: &Pool) -> Result<deadpool_redis::Connection> {
        pool.get().await.map_err(|e| CacheError::pool(e.to_string()))
    }

    /// `GET key` — raw bytes, `None` on miss.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            CacheStore::Disabled => Ok(None),
            CacheStore::Memory(store) => Ok(store.live(key)),
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
            }
        }
    }

    /// `SETEX`/`SET` — returns `true` only on a confirmed write.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<bool> {
        match self {
            CacheStore::Disabled => Ok(false),
            CacheStore::Memory(store) => {
                store.entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        data: value,
                        expires_at: ttl_seconds.map(|t| Instant::now() + Duration::from_secs(t)),
                    },
                );
                Ok(true)
            }
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                match ttl_seconds {
                    Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl).await?,
                    None => conn.set::<_, _, ()>(key, value).await?,
                }
                Ok(true)
            }
        }
    }

    /// `DEL` — number of keys actually removed.
    pub async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        match self {
            CacheStore::Disabled => Ok(0),
            CacheStore::Memory(store) => {
                let mut removed = 0;
                for key in keys {
                    // Expired-but-present entries do not count as removals.
                    if let Some((_, entry)) = store.entries.remove(key)
                        && !entry.is_expired()
                    {
                        removed += 1;
                    }
                }
                Ok(removed)
            }
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                Ok(conn.del::<_, u64>(keys.to_vec()).await?)
            }
        }
    }

    /// `KEYS pattern` — glob scan.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        match self {
            CacheStore::Disabled => Ok(Vec::new()),
            CacheStore::Memory(store) => Ok(store
                .entries
                .iter()
                .filter(|entry| !entry.value().is_expired())
                .filter(|entry| glob_match(pattern, entry.key()))
                .map(|entry| entry.key().clone())
                .collect()),
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                Ok(conn.keys::<_, Vec<String>>(pattern).await?)
            }
        }
    }

    /// `EXISTS key`.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self {
            CacheStore::Disabled => Ok(false),
            CacheStore::Memory(store) => Ok(store.live(key).is_some()),
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                Ok(conn.exists::<_, bool>(key).await?)
            }
        }
    }

    /// `TTL key` — Redis semantics: `-2` missing, `-1` no expiry,
    /// otherwise remaining seconds.
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        match self {
            CacheStore::Disabled => Ok(-2),
            CacheStore::Memory(store) => match store.entries.get(key) {
                Some(entry) if entry.is_expired() => Ok(-2),
                Some(entry) => match entry.expires_at {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        Ok(remaining.as_secs_f64().ceil() as i64)
                    }
                    None => Ok(-1),
                },
                None => Ok(-2),
            },
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                Ok(conn.ttl::<_, i64>(key).await?)
            }
        }
    }

    /// `EXPIRE key seconds`.
    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        match self {
            CacheStore::Disabled => Ok(false),
            CacheStore::Memory(store) => match store.entries.get_mut(key) {
                Some(mut entry) if !entry.is_expired() => {
                    entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
                    Ok(true)
                }
                _ => Ok(false),
            },
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                Ok(conn.expire::<_, bool>(key, ttl_seconds as i64).await?)
            }
        }
    }

    /// Pipelined `MGET` — results positionally aligned with `keys`.
    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            CacheStore::Disabled => Ok(vec![None; keys.len()]),
            CacheStore::Memory(store) => Ok(keys.iter().map(|k| store.live(k)).collect()),
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                Ok(conn.mget::<_, Vec<Option<Vec<u8>>>>(keys.to_vec()).await?)
            }
        }
    }

    /// Pipelined `MSET` with per-entry TTLs; fails atomically as a group.
    pub async fn mset(&self, entries: &[(String, Vec<u8>, Option<u64>)]) -> Result<bool> {
        if entries.is_empty() {
            return Ok(true);
        }
        match self {
            CacheStore::Disabled => Ok(false),
            CacheStore::Memory(store) => {
                for (key, value, ttl) in entries {
                    store.entries.insert(
                        key.clone(),
                        MemoryEntry {
                            data: value.clone(),
                            expires_at: ttl.map(|t| Instant::now() + Duration::from_secs(t)),
                        },
                    );
                }
                Ok(true)
            }
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                let mut pipe = redis::pipe();
                pipe.atomic();
                for (key, value, ttl) in entries {
                    match ttl {
                        Some(t) => {
                            pipe.set_ex(key, value.as_slice(), *t).ignore();
                        }
                        None => {
                            pipe.set(key, value.as_slice()).ignore();
                        }
                    }
                }
                pipe.query_async::<()>(&mut conn).await?;
                Ok(true)
            }
        }
    }

    /// `PING` — used by health checks. Disabled mode reports an error so
    /// the health check classifies the store as unhealthy.
    pub async fn ping(&self) -> Result<()> {
        match self {
            CacheStore::Disabled => Err(CacheError::Disabled),
            CacheStore::Memory(_) => Ok(()),
            CacheStore::Redis { pool } => {
                let mut conn = Self::conn(pool).await?;
                redis::cmd("PING").query_async::<String>(&mut conn).await?;
                Ok(())
            }
        }
    }
}

/// Minimal glob matcher covering the `*` and `?` forms the key schema uses.
fn glob_match(pattern: &str, key: &str) -> bool {
    fn inner(p: &[u8], k: &[u8]) -> bool {
        match (p.first(), k.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], k) || (!k.is_empty() && inner(p, &k[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &k[1..]),
            (Some(pc), Some(kc)) if pc == kc => inner(&p[1..], &k[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), key.as_bytes())
}
