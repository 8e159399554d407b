use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvalidationError {
    /// Queue storage (database) error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cache-tier failure during a cascade.
    #[error("cache error: {0}")]
    Cache(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<vitalis_cache::CacheError> for InvalidationError {
    fn from(err: vitalis_cache::CacheError) -> Self {
        InvalidationError::Cache(err.to_string())
    }
}
