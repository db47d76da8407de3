//! Resource kinds and wire versioning.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything addressable in a repository carries one of these kinds.
///
/// The discriminants are part of the wire format (storage headers, packfile
/// indexes, state delta frames) and must never be renumbered.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ResourceKind {
    Config,
    State,
    Packfile,
    Snapshot,
    Chunk,
    Object,
    VfsBtree,
    VfsEntry,
    BtreeNode,
    Signature,
    Error,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Config,
        ResourceKind::State,
        ResourceKind::Packfile,
        ResourceKind::Snapshot,
        ResourceKind::Chunk,
        ResourceKind::Object,
        ResourceKind::VfsBtree,
        ResourceKind::VfsEntry,
        ResourceKind::BtreeNode,
        ResourceKind::Signature,
        ResourceKind::Error,
    ];

    pub fn as_u16(self) -> u16 {
        match self {
            ResourceKind::Config => 0,
            ResourceKind::State => 1,
            ResourceKind::Packfile => 2,
            ResourceKind::Snapshot => 3,
            ResourceKind::Chunk => 4,
            ResourceKind::Object => 5,
            ResourceKind::VfsBtree => 6,
            ResourceKind::VfsEntry => 7,
            ResourceKind::BtreeNode => 8,
            ResourceKind::Signature => 9,
            ResourceKind::Error => 10,
        }
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_u16() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Config => "config",
            ResourceKind::State => "state",
            ResourceKind::Packfile => "packfile",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::Chunk => "chunk",
            ResourceKind::Object => "object",
            ResourceKind::VfsBtree => "vfs-btree",
            ResourceKind::VfsEntry => "vfs-entry",
            ResourceKind::BtreeNode => "btree-node",
            ResourceKind::Signature => "signature",
            ResourceKind::Error => "error",
        }
    }

    /// Parse the user-facing name (as printed by `as_str`).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// The wire version currently written for this kind.
    pub fn current_version(self) -> Version {
        match self {
            ResourceKind::Config => Version::new(1, 0),
            ResourceKind::State => Version::new(1, 0),
            ResourceKind::Packfile => Version::new(1, 0),
            ResourceKind::Snapshot => Version::new(1, 0),
            ResourceKind::Chunk => Version::new(1, 0),
            ResourceKind::Object => Version::new(1, 0),
            ResourceKind::VfsBtree => Version::new(1, 0),
            ResourceKind::VfsEntry => Version::new(1, 0),
            ResourceKind::BtreeNode => Version::new(1, 0),
            ResourceKind::Signature => Version::new(1, 0),
            ResourceKind::Error => Version::new(1, 0),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ResourceKind> for u16 {
    fn from(kind: ResourceKind) -> u16 {
        kind.as_u16()
    }
}

impl TryFrom<u16> for ResourceKind {
    type Error = String;

    fn try_from(raw: u16) -> std::result::Result<Self, String> {
        ResourceKind::from_u16(raw).ok_or_else(|| format!("unknown resource kind: {raw}"))
    }
}

/// A wire version, packed as `major << 8 | minor`.
///
/// Decoders surface the stored version to the caller; refusing an unknown
/// major is the caller's responsibility.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Version(u16);

impl Version {
    pub fn new(major: u8, minor: u8) -> Self {
        Self(u16::from(major) << 8 | u16::from(minor))
    }

    pub fn from_u16(raw: u16) -> Self {
        Self(raw)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn major(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn minor(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// Whether a decoder that understands `self` may read data tagged `other`.
    pub fn accepts(self, other: Version) -> bool {
        self.major() == other.major() && self.minor() >= other.minor()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_u16(kind.as_u16()), Some(kind));
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::from_u16(999), None);
    }

    #[test]
    fn version_packing() {
        let v = Version::new(1, 2);
        assert_eq!(v.major(), 1);
        assert_eq!(v.minor(), 2);
        assert_eq!(v.to_string(), "1.2");
        assert_eq!(Version::from_u16(v.as_u16()), v);
    }

    #[test]
    fn version_accepts_same_major() {
        assert!(Version::new(1, 3).accepts(Version::new(1, 0)));
        assert!(!Version::new(1, 0).accepts(Version::new(2, 0)));
        assert!(!Version::new(1, 0).accepts(Version::new(1, 1)));
    }
}
