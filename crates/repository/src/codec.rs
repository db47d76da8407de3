//! The codec pipeline: the single entry points through which every stored
//! byte passes.
//!
//! Encoding is `compress -> encrypt -> header(MAC)`, fixed at repository
//! creation; decoding reverses strictly. The storage header prefixes every
//! wrapped object:
//!
//! ```text
//! magic(4) | version(2, LE) | kind(2, LE) | mac(32) | length(8, LE) | body
//! ```
//!
//! The MAC in the header is keyed and covers the body (the encrypted,
//! compressed payload). Packfile bodies embed one such envelope per blob;
//! ranged reads skip the header and run only the body half of the pipeline.

use crate::error::{RepositoryError, Result};
use async_compression::tokio::write::{ZstdDecoder, ZstdEncoder};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use silo_core::{
    CompressionAlgorithm, CompressionConfig, HashingAlgorithm, KdfParams, Mac, ResourceKind,
    Version,
};
use tokio::io::AsyncWriteExt;

pub const STORAGE_MAGIC: [u8; 4] = *b"SILO";

/// Fixed byte count of the storage header.
pub const STORAGE_HEADER_LEN: usize = 4 + 2 + 2 + 32 + 8;

const NONCE_LEN: usize = 24;
const CANARY_PLAINTEXT: &[u8] = b"silo-canary-v1";

/// Secret material derived at open time.
#[derive(Clone)]
pub struct Keys {
    pub data_key: [u8; 32],
    pub mac_secret: [u8; 32],
}

impl Keys {
    /// Derive the data and MAC keys from a passphrase with the repository's
    /// recorded KDF parameters.
    pub fn derive(passphrase: &str, kdf: &KdfParams) -> Result<Self> {
        let params = argon2::Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(64))
            .map_err(|e| RepositoryError::Internal(format!("bad KDF parameters: {e}")))?;
        let argon = argon2::Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        );

        let mut output = [0u8; 64];
        argon
            .hash_password_into(passphrase.as_bytes(), &kdf.salt, &mut output)
            .map_err(|e| RepositoryError::Internal(format!("key derivation failed: {e}")))?;

        let mut data_key = [0u8; 32];
        let mut mac_secret = [0u8; 32];
        data_key.copy_from_slice(&output[..32]);
        mac_secret.copy_from_slice(&output[32..]);
        Ok(Self {
            data_key,
            mac_secret,
        })
    }

    /// Seal the canary probe stored in the repository configuration.
    pub fn seal_canary(&self) -> Result<Vec<u8>> {
        encrypt_record(&self.data_key, CANARY_PLAINTEXT)
    }

    /// Open the canary; failure means the passphrase is wrong.
    pub fn check_canary(&self, canary: &[u8]) -> Result<()> {
        match decrypt_record(&self.data_key, canary) {
            Ok(plain) if plain == CANARY_PLAINTEXT => Ok(()),
            _ => Err(silo_core::Error::BadCanary.into()),
        }
    }
}

fn encrypt_record(data_key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let subkey = record_subkey(data_key, &nonce);
    let cipher = XChaCha20Poly1305::new((&subkey).into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| RepositoryError::Internal("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_record(data_key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(silo_core::Error::Truncated("encrypted record".to_string()).into());
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let subkey = record_subkey(data_key, nonce);
    let cipher = XChaCha20Poly1305::new((&subkey).into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| silo_core::Error::BadMac.into())
}

/// Per-record subkey: the nonce keyed-hashed with the data key, so no two
/// records encrypt under the same (key, nonce) pair even across processes.
fn record_subkey(data_key: &[u8; 32], nonce: &[u8]) -> [u8; 32] {
    let mut hasher = HashingAlgorithm::Sha256.mac_hasher(data_key);
    hasher.update(nonce);
    *hasher.finalize().as_bytes()
}

/// The configured encode/decode pipeline.
#[derive(Clone)]
pub struct Codec {
    hashing: HashingAlgorithm,
    mac_secret: [u8; 32],
    compression: Option<CompressionConfig>,
    data_key: Option<[u8; 32]>,
}

impl Codec {
    pub fn new(
        hashing: HashingAlgorithm,
        mac_secret: [u8; 32],
        compression: Option<CompressionConfig>,
        data_key: Option<[u8; 32]>,
    ) -> Self {
        Self {
            hashing,
            mac_secret,
            compression,
            data_key,
        }
    }

    /// The keyed MAC over arbitrary bytes.
    pub fn compute_mac(&self, data: &[u8]) -> Mac {
        let mut hasher = self.hashing.mac_hasher(&self.mac_secret);
        hasher.update(data);
        hasher.finalize()
    }

    pub fn hashing(&self) -> HashingAlgorithm {
        self.hashing
    }

    pub fn mac_hasher(&self) -> silo_core::MacHasher {
        self.hashing.mac_hasher(&self.mac_secret)
    }

    /// Compress and encrypt a payload, without the storage header. This is
    /// the form blobs take inside a packfile body and the form the packfile
    /// index and footer are stored in.
    pub async fn encode_body(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut data = match &self.compression {
            Some(cfg) => compress(cfg, payload).await?,
            None => payload.to_vec(),
        };
        if let Some(key) = &self.data_key {
            data = encrypt_record(key, &data)?;
        }
        Ok(data)
    }

    /// Inverse of [`encode_body`].
    pub async fn decode_body(&self, data: &[u8]) -> Result<Vec<u8>> {
        let data = match &self.data_key {
            Some(key) => decrypt_record(key, data)?,
            None => data.to_vec(),
        };
        match &self.compression {
            Some(cfg) => decompress(cfg, &data).await,
            None => Ok(data),
        }
    }

    /// Full envelope: encoded body prefixed with the storage header.
    pub async fn encode(&self, kind: ResourceKind, payload: &[u8]) -> Result<Vec<u8>> {
        let body = self.encode_body(payload).await?;
        let mac = self.compute_mac(&body);

        let version = kind.current_version();
        let mut out = Vec::with_capacity(STORAGE_HEADER_LEN + body.len());
        out.extend_from_slice(&STORAGE_MAGIC);
        out.extend_from_slice(&version.as_u16().to_le_bytes());
        out.extend_from_slice(&kind.as_u16().to_le_bytes());
        out.extend_from_slice(mac.as_bytes());
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Inverse of [`encode`], failing on any header or integrity mismatch.
    pub async fn decode(&self, expected: ResourceKind, data: &[u8]) -> Result<(Version, Vec<u8>)> {
        let (version, kind, mac, body) = split_envelope(data)?;
        if kind != expected {
            return Err(silo_core::Error::BadKind {
                expected,
                actual: kind,
            }
            .into());
        }
        if !expected.current_version().accepts(version) {
            return Err(silo_core::Error::BadVersion(version).into());
        }
        if self.compute_mac(body) != mac {
            return Err(silo_core::Error::BadMac.into());
        }
        let payload = self.decode_body(body).await?;
        Ok((version, payload))
    }
}

/// Parse the storage header, returning the body slice.
pub fn split_envelope(data: &[u8]) -> Result<(Version, ResourceKind, Mac, &[u8])> {
    if data.len() < STORAGE_HEADER_LEN {
        return Err(silo_core::Error::Truncated(format!(
            "storage header needs {STORAGE_HEADER_LEN} bytes, got {}",
            data.len()
        ))
        .into());
    }
    if data[..4] != STORAGE_MAGIC {
        return Err(silo_core::Error::BadMagic.into());
    }

    let version = Version::from_u16(u16::from_le_bytes([data[4], data[5]]));
    let raw_kind = u16::from_le_bytes([data[6], data[7]]);
    let kind = ResourceKind::from_u16(raw_kind)
        .ok_or(silo_core::Error::UnknownKind(raw_kind))?;

    let mut mac = [0u8; 32];
    mac.copy_from_slice(&data[8..40]);

    let length = u64::from_le_bytes(data[40..48].try_into().expect("8 bytes"));
    let body = &data[STORAGE_HEADER_LEN..];
    if body.len() as u64 != length {
        return Err(silo_core::Error::Truncated(format!(
            "envelope declares {length} body bytes, got {}",
            body.len()
        ))
        .into());
    }

    Ok((version, kind, Mac::from_bytes(mac), body))
}

/// Config objects bootstrap the pipeline, so their envelope uses the plain
/// (unkeyed) hash and skips compression and encryption entirely.
pub fn encode_config(payload: &[u8]) -> Vec<u8> {
    let mut hasher = HashingAlgorithm::Sha256.hasher();
    hasher.update(payload);
    let mac = hasher.finalize();

    let version = ResourceKind::Config.current_version();
    let mut out = Vec::with_capacity(STORAGE_HEADER_LEN + payload.len());
    out.extend_from_slice(&STORAGE_MAGIC);
    out.extend_from_slice(&version.as_u16().to_le_bytes());
    out.extend_from_slice(&ResourceKind::Config.as_u16().to_le_bytes());
    out.extend_from_slice(mac.as_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn decode_config(data: &[u8]) -> Result<(Version, Vec<u8>)> {
    let (version, kind, mac, body) = split_envelope(data)?;
    if kind != ResourceKind::Config {
        return Err(silo_core::Error::BadKind {
            expected: ResourceKind::Config,
            actual: kind,
        }
        .into());
    }

    let mut hasher = HashingAlgorithm::Sha256.hasher();
    hasher.update(body);
    if hasher.finalize() != mac {
        return Err(silo_core::Error::BadMac.into());
    }
    Ok((version, body.to_vec()))
}

async fn compress(cfg: &CompressionConfig, data: &[u8]) -> Result<Vec<u8>> {
    match cfg.algorithm {
        CompressionAlgorithm::Zstd => {
            let mut encoder = ZstdEncoder::with_quality(
                Vec::new(),
                async_compression::Level::Precise(cfg.level),
            );
            encoder.write_all(data).await.map_err(io_internal)?;
            encoder.shutdown().await.map_err(io_internal)?;
            Ok(encoder.into_inner())
        }
    }
}

async fn decompress(cfg: &CompressionConfig, data: &[u8]) -> Result<Vec<u8>> {
    match cfg.algorithm {
        CompressionAlgorithm::Zstd => {
            let mut decoder = ZstdDecoder::new(Vec::new());
            decoder
                .write_all(data)
                .await
                .map_err(|_| truncated_stream())?;
            decoder.shutdown().await.map_err(|_| truncated_stream())?;
            Ok(decoder.into_inner())
        }
    }
}

fn io_internal(e: std::io::Error) -> RepositoryError {
    RepositoryError::Internal(format!("compression failed: {e}"))
}

fn truncated_stream() -> RepositoryError {
    silo_core::Error::Truncated("compressed stream".to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_codec() -> Codec {
        Codec::new(HashingAlgorithm::Sha256, [7u8; 32], None, None)
    }

    fn full_codec() -> (Codec, Keys) {
        let kdf = KdfParams::new([9u8; 16]);
        let keys = Keys::derive("correct horse battery staple", &kdf).unwrap();
        let codec = Codec::new(
            HashingAlgorithm::Sha256,
            keys.mac_secret,
            Some(CompressionConfig::default()),
            Some(keys.data_key),
        );
        (codec, keys)
    }

    #[tokio::test]
    async fn roundtrip_every_kind_plain() {
        let codec = plain_codec();
        let payload = b"the quick brown fox".repeat(100);
        for kind in ResourceKind::ALL {
            let wire = codec.encode(kind, &payload).await.unwrap();
            let (version, decoded) = codec.decode(kind, &wire).await.unwrap();
            assert_eq!(version, kind.current_version());
            assert_eq!(decoded, payload);
        }
    }

    #[tokio::test]
    async fn roundtrip_compressed_encrypted() {
        let (codec, _) = full_codec();
        let payload = vec![0u8; 64 * 1024];
        let wire = codec.encode(ResourceKind::Chunk, &payload).await.unwrap();
        // Zero bytes compress; the envelope must be far smaller than the input.
        assert!(wire.len() < payload.len() / 2);

        let (_, decoded) = codec.decode(ResourceKind::Chunk, &wire).await.unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn decode_rejects_wrong_kind() {
        let codec = plain_codec();
        let wire = codec.encode(ResourceKind::Chunk, b"data").await.unwrap();
        let err = codec.decode(ResourceKind::Object, &wire).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Core(silo_core::Error::BadKind { .. })
        ));
    }

    #[tokio::test]
    async fn decode_rejects_flipped_byte() {
        let codec = plain_codec();
        let mut wire = codec.encode(ResourceKind::Chunk, b"data").await.unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        let err = codec.decode(ResourceKind::Chunk, &wire).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Core(silo_core::Error::BadMac)
        ));
    }

    #[tokio::test]
    async fn decode_rejects_truncation() {
        let codec = plain_codec();
        let wire = codec.encode(ResourceKind::Chunk, b"some data").await.unwrap();
        let err = codec
            .decode(ResourceKind::Chunk, &wire[..wire.len() - 3])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Core(silo_core::Error::Truncated(_))
        ));
    }

    #[test]
    fn canary_detects_wrong_passphrase() {
        let kdf = KdfParams::new([1u8; 16]);
        let keys = Keys::derive("correct horse battery staple", &kdf).unwrap();
        let canary = keys.seal_canary().unwrap();

        keys.check_canary(&canary).unwrap();

        let wrong = Keys::derive("incorrect zebra battery staple", &kdf).unwrap();
        let err = wrong.check_canary(&canary).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Core(silo_core::Error::BadCanary)
        ));
    }

    #[test]
    fn config_envelope_roundtrip() {
        let wire = encode_config(b"config-bytes");
        let (version, payload) = decode_config(&wire).unwrap();
        assert_eq!(version, ResourceKind::Config.current_version());
        assert_eq!(payload, b"config-bytes");

        let mut corrupted = wire.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 1;
        assert!(decode_config(&corrupted).is_err());
    }
}
