//! Read-through cache layer for the Vitalis health platform.
//!
//! ## Architecture
//!
//! - **Codec**: versioned [`codec::CacheEnvelope`] around every value,
//!   gzip-compressed above 10 KB.
//! - **Store client**: [`store::CacheStore`] over the remote Redis
//!   service, with `Memory` and permanent `Disabled` backends.
//! - **Manager**: [`manager::CacheManager`], the public surface — every
//!   operation degrades to a benign miss/`false`/`0` when the cache tier
//!   is unavailable.
//! - **Type registry**: the closed [`types::CacheType`] enum; all keys are
//!   `prefix + id [+ ":" + suffix]`.
//! - **Read-through**: [`read_through::cache_user_data`], the sanctioned
//!   get-or-compute-and-cache path.
//!
//! ## Graceful Degradation
//!
//! The relational store remains the source of truth. Total cache
//! unavailability degrades performance, never correctness: reads fall
//! back to recomputation and nothing here raises across the public
//! boundary.

pub mod audit;
pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod read_through;
pub mod store;
pub mod types;

pub use audit::{CacheAuditSink, CacheErrorRecord, CacheOperationRecord, NoopAuditSink};
pub use codec::{CacheEnvelope, Decoded, ENVELOPE_VERSION};
pub use config::CacheStoreConfig;
pub use error::CacheError;
pub use manager::{CacheHealth, CacheManager, HealthState};
pub use read_through::cache_user_data;
pub use store::CacheStore;
pub use types::{CacheType, UnknownCacheType, cache_key};
