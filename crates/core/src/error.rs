//! Error taxonomy shared across the engine.

use crate::resource::{ResourceKind, Version};
use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected resource kind: expected {expected}, got {actual}")]
    BadKind {
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("unknown resource kind: {0}")]
    UnknownKind(u16),

    #[error("bad storage magic")]
    BadMagic,

    #[error("MAC mismatch")]
    BadMac,

    #[error("refused wire version {0}")]
    BadVersion(Version),

    #[error("truncated input: {0}")]
    Truncated(String),

    #[error("decryption canary mismatch (wrong passphrase?)")]
    BadCanary,

    #[error("invalid MAC encoding: {0}")]
    InvalidMac(String),

    #[error("invalid configuration: {0}")]
    BadConfig(String),

    #[error("passphrase too weak: {0}")]
    WeakPassphrase(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
