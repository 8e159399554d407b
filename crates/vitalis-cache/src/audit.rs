//! Best-effort audit records for cache operations.
//!
//! The manager emits one record per mutating operation to a
//! [`CacheAuditSink`], fire-and-forget: the write happens on a spawned
//! task, and sink errors are logged at debug and discarded. An audit
//! failure must never affect the primary cache operation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Result;

/// Record of a successful cache operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOperationRecord {
    pub operation: String,
    pub cache_key: String,
    /// Free-form operation details (payload size, compressed flag, ttl...).
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl CacheOperationRecord {
    pub fn new(operation: impl Into<String>, cache_key: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            cache_key: cache_key.into(),
            metadata,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Record of a failed cache operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheErrorRecord {
    pub operation: String,
    pub cache_key: String,
    pub error_message: String,
    /// Debug rendering of the underlying error, when one exists. Corrupt
    /// payloads and other message-only failures leave this empty.
    pub error_stack: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl CacheErrorRecord {
    pub fn new(
        operation: impl Into<String>,
        cache_key: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            cache_key: cache_key.into(),
            error_message: error_message.into(),
            error_stack: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Attaches the error's debug rendering.
    #[must_use]
    pub fn with_error_stack(mut self, stack: impl Into<String>) -> Self {
        self.error_stack = Some(stack.into());
        self
    }
}

/// Durable sink for audit records.
#[async_trait]
pub trait CacheAuditSink: Send + Sync {
    /// Persist an operation record.
    async fn log_operation(&self, record: CacheOperationRecord) -> Result<()>;

    /// Persist an error record.
    async fn log_error(&self, record: CacheErrorRecord) -> Result<()>;
}

/// Sink that drops every record. Default for callers that do not wire a
/// durable store.
pub struct NoopAuditSink;

#[async_trait]
impl CacheAuditSink for NoopAuditSink {
    async fn log_operation(&self, _record: CacheOperationRecord) -> Result<()> {
        Ok(())
    }

    async fn log_error(&self, _record: CacheErrorRecord) -> Result<()> {
        Ok(())
    }
}
