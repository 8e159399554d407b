//! Asynchronous cache invalidation for the Vitalis health platform.
//!
//! Mutating request paths append [`types::InvalidationQueueItem`]s to a
//! durable queue and return immediately; the [`processor`] polls the
//! queue on an interval and runs per-type [`cascade`] handlers that
//! delete the stale entries plus their derived caches. Failed cascades
//! are retried up to a ceiling, then frozen for operator inspection.
//!
//! Cache state is eventually consistent, bounded by the poll interval.
//! Correctness never depends on invalidation succeeding: reads fall
//! through to the source of truth on a miss.

pub mod cascade;
pub mod error;
pub mod memory;
pub mod processor;
pub mod queue;
pub mod service;
pub mod types;

pub use cascade::{CascadeInvalidator, InvalidationHandler};
pub use error::InvalidationError;
pub use memory::MemoryQueueStorage;
pub use processor::{
    BatchSummary, InvalidationProcessor, ProcessorConfig, ProcessorHandle, TickOutcome,
};
pub use queue::InvalidationQueueStorage;
pub use service::{
    InvalidationService, invalidate_order_data, invalidate_user_data, run_until_shutdown,
    shutdown_signal,
};
pub use types::{InvalidationQueueItem, QueueStats};
