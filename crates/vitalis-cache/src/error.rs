//! Error types for the cache layer.

/// Errors internal to the cache layer.
///
/// These never cross the `CacheManager` public surface: the manager
/// converts every failure into a benign miss/`false`/`0` result. They are
/// surfaced only through the fallible `try_*` twins used by invalidation
/// cascades.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The store client is in permanent disabled mode.
    #[error("cache store is disabled")]
    Disabled,

    /// Redis command error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Connection pool error.
    #[error("connection pool error: {message}")]
    Pool { message: String },

    /// Envelope serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload compression/decompression error.
    #[error("compression error: {message}")]
    Compression { message: String },

    /// Audit sink write error. Always caught and discarded by the manager.
    #[error("audit sink error: {message}")]
    Audit { message: String },
}

impl CacheError {
    /// Creates a new pool error.
    #[must_use]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
        }
    }

    /// Creates a new compression error.
    #[must_use]
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression {
            message: message.into(),
        }
    }

    /// Creates a new audit sink error.
    #[must_use]
    pub fn audit(message: impl Into<String>) -> Self {
        Self::Audit {
            message: message.into(),
        }
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::pool("pool exhausted");
        assert!(err.to_string().contains("connection pool error"));

        let err = CacheError::Disabled;
        assert_eq!(err.to_string(), "cache store is disabled");
    }
}
