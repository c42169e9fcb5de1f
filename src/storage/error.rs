//! Storage error types

use thiserror::Error;

/// Errors that can occur while writing persisted state
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid bucket name: {0}")]
    InvalidBucket(String),

    #[error("Serialization error for {bucket}: {source}")]
    Serialization {
        bucket: String,
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
