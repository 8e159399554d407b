//! PostgreSQL backends for the Vitalis cache subsystem.
//!
//! Provides the durable pieces the in-memory crates abstract over:
//!
//! - [`PostgresQueueStorage`]: the invalidation queue table, implementing
//!   [`vitalis_invalidation::InvalidationQueueStorage`].
//! - [`PostgresAuditSink`]: cache operation and error logs, implementing
//!   [`vitalis_cache::CacheAuditSink`].
//!
//! Tables are created lazily on first use, so deployments need no
//! separate migration step for this subsystem.

pub mod audit_storage;
pub mod config;
pub mod error;
pub mod pool;
pub mod queue_storage;

pub use audit_storage::PostgresAuditSink;
pub use config::PostgresConfig;
pub use error::{PostgresError, Result};
pub use pool::create_pool;
pub use queue_storage::PostgresQueueStorage;
