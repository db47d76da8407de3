//! The packfile container: `body | index | footer | footer-length`.
//!
//! The body is a concatenation of blob envelopes as produced by the codec.
//! The index describes every blob; the footer carries the index offset and
//! the keyed MAC of the plaintext index, recomputed on read. The last four
//! bytes are the little-endian length of the encoded footer.
//!
//! Packfiles are immutable once uploaded; their MAC is the keyed hash over
//! the final serialized bytes, exactly as the store sees them.

use crate::codec::{Codec, STORAGE_HEADER_LEN};
use crate::error::{RepositoryError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use silo_core::{Mac, ResourceKind, Version};
use std::collections::HashMap;
use time::OffsetDateTime;

pub const FLAG_NONE: u32 = 0;

/// One blob's position inside a packfile body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexEntry {
    pub kind: ResourceKind,
    pub version: Version,
    pub mac: Mac,
    /// Offset of the blob envelope within the body.
    pub offset: u64,
    /// Length of the encoded blob body, storage header excluded.
    pub length: u32,
    pub flags: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Footer {
    pub version: Version,
    #[serde(with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
    pub index_offset: u64,
    pub index_mac: Mac,
    pub count: u32,
}

/// A finalized packfile ready for upload.
pub struct FinalizedPack {
    pub mac: Mac,
    pub bytes: Bytes,
    pub entries: Vec<IndexEntry>,
}

/// Accumulates blob envelopes into a packfile body.
pub struct PackWriter {
    body: Vec<u8>,
    entries: Vec<IndexEntry>,
}

impl PackWriter {
    pub fn new() -> Self {
        Self {
            body: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Append a blob envelope to the body, recording its index entry.
    pub fn add_blob(&mut self, kind: ResourceKind, mac: Mac, envelope: &[u8]) {
        debug_assert!(envelope.len() >= STORAGE_HEADER_LEN);
        self.entries.push(IndexEntry {
            kind,
            version: kind.current_version(),
            mac,
            offset: self.body.len() as u64,
            length: (envelope.len() - STORAGE_HEADER_LEN) as u32,
            flags: FLAG_NONE,
        });
        self.body.extend_from_slice(envelope);
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Serialize index and footer, append the trailer, and compute the
    /// packfile MAC over the final bytes.
    pub async fn finalize(self, codec: &Codec, now: OffsetDateTime) -> Result<FinalizedPack> {
        let index_plain = rmp_serde::to_vec_named(&self.entries)?;
        let index_mac = codec.compute_mac(&index_plain);
        let index_encoded = codec.encode_body(&index_plain).await?;

        let footer = Footer {
            version: ResourceKind::Packfile.current_version(),
            timestamp: now,
            index_offset: self.body.len() as u64,
            index_mac,
            count: self.entries.len() as u32,
        };
        let footer_encoded = codec.encode_body(&rmp_serde::to_vec_named(&footer)?).await?;

        let mut bytes = self.body;
        bytes.extend_from_slice(&index_encoded);
        bytes.extend_from_slice(&footer_encoded);

        let mut trailer = [0u8; 4];
        trailer.copy_from_slice(&(footer_encoded.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&trailer);

        let mac = codec.compute_mac(&bytes);
        Ok(FinalizedPack {
            mac,
            bytes: Bytes::from(bytes),
            entries: self.entries,
        })
    }
}

impl Default for PackWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed view of a stored packfile, exposing random access by (kind, mac).
#[derive(Debug)]
pub struct PackReader {
    bytes: Bytes,
    footer: Footer,
    entries: Vec<IndexEntry>,
    by_mac: HashMap<(ResourceKind, Mac), usize>,
}

impl PackReader {
    pub async fn parse(codec: &Codec, bytes: Bytes) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(RepositoryError::TruncatedPackfile(format!(
                "{} bytes, need at least a trailer",
                bytes.len()
            )));
        }

        let trailer_at = bytes.len() - 4;
        let footer_len =
            u32::from_le_bytes(bytes[trailer_at..].try_into().expect("4 bytes")) as usize;
        if footer_len > trailer_at {
            return Err(RepositoryError::BadFooter(format!(
                "footer length {footer_len} exceeds packfile"
            )));
        }

        let footer_start = trailer_at - footer_len;
        let footer_plain = codec
            .decode_body(&bytes[footer_start..trailer_at])
            .await
            .map_err(|e| RepositoryError::BadFooter(e.to_string()))?;
        let footer: Footer = rmp_serde::from_slice(&footer_plain)
            .map_err(|e| RepositoryError::BadFooter(e.to_string()))?;

        let index_start = usize::try_from(footer.index_offset)
            .map_err(|_| RepositoryError::BadFooter("index offset overflow".to_string()))?;
        if index_start > footer_start {
            return Err(RepositoryError::BadFooter(format!(
                "index offset {index_start} beyond footer"
            )));
        }

        let index_plain = codec.decode_body(&bytes[index_start..footer_start]).await?;
        if codec.compute_mac(&index_plain) != footer.index_mac {
            return Err(RepositoryError::IndexMacMismatch);
        }
        let entries: Vec<IndexEntry> = rmp_serde::from_slice(&index_plain)?;

        let by_mac = entries
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.kind, e.mac), i))
            .collect();

        Ok(Self {
            bytes,
            footer,
            entries,
            by_mac,
        })
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Locate a blob's encoded body within this packfile.
    pub fn blob_location(&self, kind: ResourceKind, mac: Mac) -> Option<(u64, u32)> {
        self.by_mac
            .get(&(kind, mac))
            .map(|&i| (self.entries[i].offset, self.entries[i].length))
    }

    /// Fetch and decode a blob's payload.
    pub async fn blob(&self, codec: &Codec, kind: ResourceKind, mac: Mac) -> Result<Vec<u8>> {
        let (offset, length) = self
            .blob_location(kind, mac)
            .ok_or(RepositoryError::BlobNotFound { kind, mac })?;

        let start = offset as usize + STORAGE_HEADER_LEN;
        let end = start + length as usize;
        if end > self.bytes.len() {
            return Err(RepositoryError::TruncatedPackfile(format!(
                "blob {} extends past packfile end",
                mac.short()
            )));
        }
        codec.decode_body(&self.bytes[start..end]).await
    }

    /// Fetch a blob's full envelope (header included), for integrity checks.
    pub fn blob_envelope(&self, kind: ResourceKind, mac: Mac) -> Option<&[u8]> {
        let (offset, length) = self.blob_location(kind, mac)?;
        let start = offset as usize;
        let end = start + STORAGE_HEADER_LEN + length as usize;
        self.bytes.get(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::HashingAlgorithm;

    fn codec() -> Codec {
        Codec::new(HashingAlgorithm::Sha256, [3u8; 32], None, None)
    }

    async fn build_pack(codec: &Codec, blobs: &[(ResourceKind, &[u8])]) -> FinalizedPack {
        let mut writer = PackWriter::new();
        for (kind, payload) in blobs {
            let mac = codec.compute_mac(payload);
            let envelope = codec.encode(*kind, payload).await.unwrap();
            writer.add_blob(*kind, mac, &envelope);
        }
        writer
            .finalize(codec, OffsetDateTime::UNIX_EPOCH)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn write_parse_roundtrip() {
        let codec = codec();
        let blobs: Vec<(ResourceKind, &[u8])> = vec![
            (ResourceKind::Chunk, b"first chunk".as_slice()),
            (ResourceKind::Chunk, b"second chunk".as_slice()),
            (ResourceKind::Object, b"an object record".as_slice()),
        ];
        let pack = build_pack(&codec, &blobs).await;
        assert_eq!(pack.entries.len(), 3);

        let reader = PackReader::parse(&codec, pack.bytes.clone()).await.unwrap();
        assert_eq!(reader.footer().count, 3);
        assert_eq!(reader.entries().len(), 3);

        for (kind, payload) in &blobs {
            let mac = codec.compute_mac(payload);
            let data = reader.blob(&codec, *kind, mac).await.unwrap();
            assert_eq!(&data, payload);
        }

        // MAC of the final bytes is the packfile's name.
        assert_eq!(codec.compute_mac(&pack.bytes), pack.mac);
    }

    #[tokio::test]
    async fn ranged_reads_match_full_parse() {
        let codec = codec();
        let payload = b"ranged access payload".as_slice();
        let pack = build_pack(&codec, &[(ResourceKind::Chunk, payload)]).await;
        let entry = &pack.entries[0];

        // What a store-side ranged read would return: skip the blob's
        // storage header, read `length` bytes.
        let start = entry.offset as usize + STORAGE_HEADER_LEN;
        let raw = &pack.bytes[start..start + entry.length as usize];
        let decoded = codec.decode_body(raw).await.unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn empty_pack_roundtrips() {
        let codec = codec();
        let pack = build_pack(&codec, &[]).await;
        let reader = PackReader::parse(&codec, pack.bytes).await.unwrap();
        assert_eq!(reader.footer().count, 0);
        assert!(reader.entries().is_empty());
    }

    #[tokio::test]
    async fn corrupted_index_is_detected() {
        let codec = codec();
        let pack = build_pack(&codec, &[(ResourceKind::Chunk, b"x".as_slice())]).await;

        let mut bytes = pack.bytes.to_vec();
        // Flip a byte inside the encoded index region (between body end and
        // footer start).
        let body_end = pack.entries[0].offset as usize
            + STORAGE_HEADER_LEN
            + pack.entries[0].length as usize;
        bytes[body_end] ^= 0xff;

        let err = PackReader::parse(&codec, Bytes::from(bytes)).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::IndexMacMismatch | RepositoryError::Serialization(_)
        ));
    }

    #[tokio::test]
    async fn truncated_packfile_is_detected() {
        let codec = codec();
        let pack = build_pack(&codec, &[(ResourceKind::Chunk, b"x".as_slice())]).await;
        let err = PackReader::parse(&codec, pack.bytes.slice(..2)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::TruncatedPackfile(_)));
    }

    #[tokio::test]
    async fn bad_footer_length_is_detected() {
        let codec = codec();
        let pack = build_pack(&codec, &[]).await;
        let mut bytes = pack.bytes.to_vec();
        let at = bytes.len() - 4;
        bytes[at..].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = PackReader::parse(&codec, Bytes::from(bytes)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::BadFooter(_)));
    }
}
