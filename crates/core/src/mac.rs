//! 32-byte MACs and the plain/keyed hasher pair.

use hmac::{Hmac, Mac as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte tag naming a blob, packfile or state delta.
///
/// Produced either by a plain hash or by a keyed construction; the repository
/// fixes the algorithm at creation and never mixes the two flavors for the
/// same resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Mac([u8; 32]);

impl Mac {
    pub const ZERO: Mac = Mac([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from lowercase hex.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidMac(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(pair)
                .map_err(|e| crate::Error::InvalidMac(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex, 16)
                .map_err(|e| crate::Error::InvalidMac(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Abbreviated form used in logs and listings.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({})", self.short())
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hashing algorithms a repository may be created with.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum HashingAlgorithm {
    #[serde(rename = "SHA256")]
    Sha256,
}

impl HashingAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            HashingAlgorithm::Sha256 => "SHA256",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SHA256" => Some(HashingAlgorithm::Sha256),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            HashingAlgorithm::Sha256 => 256,
        }
    }

    /// Plain (unkeyed) incremental hasher.
    pub fn hasher(self) -> MacHasher {
        match self {
            HashingAlgorithm::Sha256 => MacHasher::Sha256(Sha256::new()),
        }
    }

    /// Keyed incremental hasher.
    pub fn mac_hasher(self, secret: &[u8]) -> MacHasher {
        match self {
            HashingAlgorithm::Sha256 => MacHasher::HmacSha256(Box::new(
                Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts any key length"),
            )),
        }
    }
}

/// Incremental hasher producing a [`Mac`], plain or keyed.
pub enum MacHasher {
    Sha256(Sha256),
    HmacSha256(Box<Hmac<Sha256>>),
}

impl MacHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            MacHasher::Sha256(h) => h.update(data),
            MacHasher::HmacSha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Mac {
        match self {
            MacHasher::Sha256(h) => Mac(h.finalize().into()),
            MacHasher::HmacSha256(h) => Mac(h.finalize().into_bytes().into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let mut hasher = HashingAlgorithm::Sha256.hasher();
        hasher.update(b"hello world");
        let mac = hasher.finalize();

        let parsed = Mac::from_hex(&mac.to_hex()).unwrap();
        assert_eq!(mac, parsed);
        assert_eq!(mac.short().len(), 12);
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(Mac::from_hex("abcd").is_err());
        assert!(Mac::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn keyed_differs_from_plain() {
        let mut plain = HashingAlgorithm::Sha256.hasher();
        plain.update(b"payload");

        let mut keyed = HashingAlgorithm::Sha256.mac_hasher(b"secret");
        keyed.update(b"payload");

        assert_ne!(plain.finalize(), keyed.finalize());
    }

    #[test]
    fn keyed_is_deterministic_per_key() {
        let tag = |key: &[u8]| {
            let mut h = HashingAlgorithm::Sha256.mac_hasher(key);
            h.update(b"payload");
            h.finalize()
        };
        assert_eq!(tag(b"k1"), tag(b"k1"));
        assert_ne!(tag(b"k1"), tag(b"k2"));
    }
}
