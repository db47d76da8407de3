//! Object and chunk records.

use crate::mac::Mac;
use serde::{Deserialize, Serialize};

/// One content-defined chunk of a file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub mac: Mac,
    pub length: u32,
    pub entropy: f64,
}

/// A file's content description: the ordered chunk list plus content
/// metadata.
///
/// The object's MAC is the hash over the concatenated chunk bytes (the
/// reassembly hash), so it is independent of where chunk boundaries fell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Object {
    pub mac: Mac,
    pub content_type: String,
    pub chunks: Vec<Chunk>,
    pub entropy: f64,
    /// Normalized byte-value histogram over the whole content.
    pub distribution: Vec<f64>,
}

impl Object {
    pub fn new() -> Self {
        Self {
            mac: Mac::ZERO,
            content_type: String::new(),
            chunks: Vec::new(),
            entropy: 0.0,
            distribution: Vec::new(),
        }
    }

    pub fn total_length(&self) -> u64 {
        self.chunks.iter().map(|c| u64::from(c.length)).sum()
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        rmp_serde::from_slice(data).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

/// Shannon entropy of `data` together with its raw byte histogram.
pub fn shannon_entropy(data: &[u8]) -> (f64, [f64; 256]) {
    let mut freq = [0f64; 256];
    if data.is_empty() {
        return (0.0, freq);
    }

    for &b in data {
        freq[usize::from(b)] += 1.0;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;
    for f in freq.iter().filter(|f| **f > 0.0) {
        let p = f / len;
        entropy -= p * p.log2();
    }
    (entropy, freq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_bounds() {
        let (e, _) = shannon_entropy(&[]);
        assert_eq!(e, 0.0);

        let (e, freq) = shannon_entropy(&[7u8; 1024]);
        assert_eq!(e, 0.0);
        assert_eq!(freq[7], 1024.0);

        // One of each byte value: maximal entropy, 8 bits.
        let all: Vec<u8> = (0u8..=255).collect();
        let (e, _) = shannon_entropy(&all);
        assert!((e - 8.0).abs() < 1e-9);
    }

    #[test]
    fn object_roundtrip() {
        let mut object = Object::new();
        object.content_type = "text/plain".to_string();
        object.chunks.push(Chunk {
            mac: Mac::from_bytes([1u8; 32]),
            length: 42,
            entropy: 1.5,
        });
        object.entropy = 1.5;

        let bytes = object.to_bytes().unwrap();
        let parsed = Object::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.chunks.len(), 1);
        assert_eq!(parsed.chunks[0].length, 42);
        assert_eq!(parsed.total_length(), 42);
        assert_eq!(parsed.content_type, "text/plain");
    }
}
