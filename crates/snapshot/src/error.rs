//! Snapshot layer errors.

use silo_core::Mac;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Core(#[from] silo_core::Error),

    #[error(transparent)]
    Repository(#[from] silo_repository::RepositoryError),

    #[error(transparent)]
    Storage(#[from] silo_storage::StorageError),

    #[error("snapshot not found: {0}")]
    NotFound(Mac),

    #[error("no such path in snapshot: {0}")]
    BadPath(String),

    #[error("invalid exclude pattern: {0}")]
    BadGlob(String),

    #[error("importer root failed: {0}")]
    RootFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

impl From<rmp_serde::encode::Error> for SnapshotError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SnapshotError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SnapshotError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SnapshotError::Serialization(e.to_string())
    }
}
