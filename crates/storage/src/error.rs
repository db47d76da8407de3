//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("state not found: {0}")]
    StateNotFound(String),

    #[error("packfile not found: {0}")]
    PackfileNotFound(String),

    #[error("repository already initialized at {0}")]
    AlreadyExists(String),

    #[error("repository not initialized at {0}")]
    NotInitialized(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("short read: {0}")]
    Truncated(String),

    #[error("lock {0} is held by another process")]
    LockHeld(String),

    #[error("unsupported store scheme: {0}")]
    UnsupportedScheme(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
