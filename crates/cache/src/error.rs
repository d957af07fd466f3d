//! Cache error types.

use thiserror::Error;

/// Errors that can occur in cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store failed the operation.
    #[error("Cache store error: {0}")]
    Store(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for cache results.
pub type Result<T> = std::result::Result<T, CacheError>;
