//! The snapshot header: the single blob a snapshot id resolves to.

use crate::vfs::Summary;
use serde::{Deserialize, Serialize};
use silo_core::{Mac, ResourceKind, Version};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImporterInfo {
    pub kind: String,
    pub origin: String,
    pub directory: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub version: Version,
    pub identifier: Mac,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub duration: Duration,
    pub name: String,
    pub tags: Vec<String>,
    pub job: Option<String>,
    pub importer: ImporterInfo,
    /// Roots of the three B-trees: path index, extended attributes, errors.
    pub vfs: Mac,
    pub xattrs: Mac,
    pub errors: Mac,
    pub summary: Summary,
}

impl SnapshotHeader {
    pub fn new(identifier: Mac, timestamp: OffsetDateTime) -> Self {
        Self {
            version: ResourceKind::Snapshot.current_version(),
            identifier,
            timestamp,
            duration: Duration::ZERO,
            name: String::new(),
            tags: Vec::new(),
            job: None,
            importer: ImporterInfo::default(),
            vfs: Mac::ZERO,
            xattrs: Mac::ZERO,
            errors: Mac::ZERO,
            summary: Summary::default(),
        }
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        let header: Self = rmp_serde::from_slice(data)?;
        if !ResourceKind::Snapshot
            .current_version()
            .accepts(header.version)
        {
            return Err(silo_core::Error::BadVersion(header.version).into());
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut header = SnapshotHeader::new(
            Mac::from_bytes([2u8; 32]),
            OffsetDateTime::UNIX_EPOCH,
        );
        header.name = "home @ laptop".to_string();
        header.tags = vec!["daily".to_string()];
        header.duration = Duration::seconds(3);

        let parsed = SnapshotHeader::from_bytes(&header.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.identifier, header.identifier);
        assert_eq!(parsed.name, "home @ laptop");
        assert_eq!(parsed.duration, Duration::seconds(3));
    }
}
