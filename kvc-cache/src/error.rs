//! Cache layer errors.

use kvc_client::StoreError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by [`CacheLayer`](crate::CacheLayer).
///
/// Store failures pass through untouched; the cache only adds codec errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A value could not be encoded for storage.
    #[error("failed to serialize value: {0}")]
    Serialization(String),

    /// A stored payload could not be decoded into the requested type.
    #[error("failed to deserialize value for key {key}: {reason}")]
    Deserialization { key: String, reason: String },
}

impl CacheError {
    /// The wrapped store error, if this failure came from the connection.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            CacheError::Store(err) => Some(err),
            _ => None,
        }
    }
}
