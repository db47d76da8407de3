//! Immutable repository configuration.
//!
//! Written once at `create`, read-only thereafter. The hashing algorithm,
//! chunking parameters and the compress-then-encrypt envelope order are all
//! fixed here; nothing in this structure is ever mutated in place.

use crate::mac::HashingAlgorithm;
use crate::resource::{ResourceKind, Version};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The repository configuration tuple.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub version: Version,
    pub repository_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub hashing: HashingConfig,
    pub chunking: ChunkingConfig,
    pub packfile: PackfileConfig,
    #[serde(default)]
    pub compression: Option<CompressionConfig>,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
}

impl RepositoryConfig {
    /// A fresh configuration with defaults and a random repository id.
    pub fn new(repository_id: Uuid, timestamp: OffsetDateTime) -> Self {
        Self {
            version: ResourceKind::Config.current_version(),
            repository_id,
            timestamp,
            hashing: HashingConfig::default(),
            chunking: ChunkingConfig::default(),
            packfile: PackfileConfig::default(),
            compression: Some(CompressionConfig::default()),
            encryption: None,
        }
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    pub fn from_bytes(version: Version, data: &[u8]) -> crate::Result<Self> {
        if !ResourceKind::Config.current_version().accepts(version) {
            return Err(crate::Error::BadVersion(version));
        }
        rmp_serde::from_slice(data).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.chunking.validate()?;
        if self.packfile.max_size == 0 {
            return Err(crate::Error::BadConfig(
                "packfile max size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hashing algorithm and output width fixed at creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashingConfig {
    pub algorithm: HashingAlgorithm,
    pub bits: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            algorithm: HashingAlgorithm::Sha256,
            bits: HashingAlgorithm::Sha256.bits(),
        }
    }
}

/// Content-defined chunking bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub algorithm: String,
    pub min_size: u32,
    pub normal_size: u32,
    pub max_size: u32,
}

impl ChunkingConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_size == 0 || self.min_size > self.normal_size || self.normal_size > self.max_size
        {
            return Err(crate::Error::BadConfig(format!(
                "chunking bounds must satisfy 0 < min <= normal <= max, got {}/{}/{}",
                self.min_size, self.normal_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            algorithm: "fastcdc".to_string(),
            min_size: crate::DEFAULT_CHUNK_MIN_SIZE,
            normal_size: crate::DEFAULT_CHUNK_NORMAL_SIZE,
            max_size: crate::DEFAULT_CHUNK_MAX_SIZE,
        }
    }
}

/// Packfile sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackfileConfig {
    /// Soft cap: a worker finalizes its packfile once the body exceeds this.
    /// A single blob larger than the cap still becomes one packfile.
    pub max_size: u64,
}

impl Default for PackfileConfig {
    fn default() -> Self {
        Self {
            max_size: crate::DEFAULT_PACKFILE_MAX_SIZE,
        }
    }
}

/// Compression algorithms supported by the codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Zstd,
}

impl CompressionAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionAlgorithm::Zstd => "zstd",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub algorithm: CompressionAlgorithm,
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Zstd,
            level: 3,
        }
    }
}

/// Key-derivation parameters recorded so the repository can always be
/// reopened with the same cost settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub salt: [u8; 16],
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl KdfParams {
    pub fn new(salt: [u8; 16]) -> Self {
        Self {
            algorithm: "argon2id".to_string(),
            salt,
            m_cost: 64 * 1024,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

/// Encryption settings; present only on encrypted repositories.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// AEAD used for record bodies.
    pub data_algorithm: String,
    /// Keyed construction used to derive per-record subkeys.
    pub subkey_algorithm: String,
    /// Encryption is applied per codec record, not per chunk of a record.
    pub chunk_size: u32,
    pub kdf: KdfParams,
    /// A small AEAD-sealed probe; failing to open it means wrong passphrase.
    pub canary: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RepositoryConfig {
        RepositoryConfig::new(Uuid::new_v4(), OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn roundtrip() {
        let cfg = config();
        let bytes = cfg.to_bytes().unwrap();
        let parsed = RepositoryConfig::from_bytes(cfg.version, &bytes).unwrap();
        assert_eq!(parsed.repository_id, cfg.repository_id);
        assert_eq!(parsed.chunking.normal_size, cfg.chunking.normal_size);
        assert!(parsed.encryption.is_none());
    }

    #[test]
    fn refuses_future_major() {
        let cfg = config();
        let bytes = cfg.to_bytes().unwrap();
        let err = RepositoryConfig::from_bytes(Version::new(2, 0), &bytes).unwrap_err();
        assert!(matches!(err, crate::Error::BadVersion(_)));
    }

    #[test]
    fn validates_chunking_bounds() {
        let mut cfg = config();
        cfg.chunking.min_size = cfg.chunking.max_size + 1;
        assert!(cfg.validate().is_err());
    }
}
