//! Core domain types shared across all silo crates.
//!
//! This crate defines the canonical data model:
//! - Resource kinds and their wire versions
//! - 32-byte MACs and the plain/keyed hasher pair
//! - The immutable repository configuration
//! - Objects, chunks and entropy scoring
//! - The error taxonomy shared by the engine

pub mod config;
pub mod error;
pub mod mac;
pub mod object;
pub mod resource;

pub use config::{
    ChunkingConfig, CompressionAlgorithm, CompressionConfig, EncryptionConfig, HashingConfig,
    KdfParams, PackfileConfig, RepositoryConfig,
};
pub use error::{Error, Result};
pub use mac::{HashingAlgorithm, Mac, MacHasher};
pub use object::{shannon_entropy, Chunk, Object};
pub use resource::{ResourceKind, Version};

/// Default soft cap on packfile size: 20 MiB.
pub const DEFAULT_PACKFILE_MAX_SIZE: u64 = 20 * 1024 * 1024;

/// Default content-defined chunking bounds.
pub const DEFAULT_CHUNK_MIN_SIZE: u32 = 64 * 1024;
pub const DEFAULT_CHUNK_NORMAL_SIZE: u32 = 1024 * 1024;
pub const DEFAULT_CHUNK_MAX_SIZE: u32 = 4 * 1024 * 1024;
