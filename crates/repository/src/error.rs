//! Repository error types.

use silo_core::{Mac, ResourceKind};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Core(#[from] silo_core::Error),

    #[error(transparent)]
    Storage(#[from] silo_storage::StorageError),

    #[error("bad packfile footer: {0}")]
    BadFooter(String),

    #[error("packfile index MAC mismatch")]
    IndexMacMismatch,

    #[error("truncated packfile: {0}")]
    TruncatedPackfile(String),

    #[error("blob not found: {kind} {mac}")]
    BlobNotFound { kind: ResourceKind, mac: Mac },

    #[error("packfile not found: {0}")]
    PackfileNotFound(Mac),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(Mac),

    #[error("cache directory {0} is in use by another process")]
    CacheInUse(PathBuf),

    #[error("maintenance lock is held by another process")]
    LockHeld,

    #[error("repository state needs repair: {0}")]
    RepairNeeded(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

impl From<rmp_serde::encode::Error> for RepositoryError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RepositoryError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}
