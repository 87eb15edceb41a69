use thiserror::Error;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis connection failed: {0}")]
    ConnectionError(String),

    #[error("Cache serialization failed: {0}")]
    SerializationError(String),

    #[error("Redis command failed: {0}")]
    CommandError(String),

    #[error("Invalid TTL: {0}")]
    TtlError(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::CommandError(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(e: bb8::RunError<redis::RedisError>) -> Self {
        CacheError::ConnectionError(e.to_string())
    }
}
