//! VFS entry records: what a snapshot knows about each path.

use serde::{Deserialize, Serialize};
use silo_core::Mac;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Inode-like stat data carried by every entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    /// Modification time, nanoseconds since the epoch.
    pub mtime_ns: i64,
}

/// Roll-up aggregates for a directory subtree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub errors: u64,
    pub total_size: u64,
}

impl Summary {
    pub fn add_child_summary(&mut self, child: &Summary) {
        self.directories += child.directories;
        self.files += child.files;
        self.symlinks += child.symlinks;
        self.errors += child.errors;
        self.total_size += child.total_size;
    }

    pub fn add_entry(&mut self, kind: EntryKind, size: u64) {
        match kind {
            EntryKind::File => {
                self.files += 1;
                self.total_size += size;
            }
            EntryKind::Directory => self.directories += 1,
            EntryKind::Symlink => self.symlinks += 1,
        }
    }
}

/// One file, directory or symlink record, stored as a `vfs-entry` blob and
/// referenced by path through the VFS B-tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    pub pathname: String,
    pub kind: EntryKind,
    pub stat: FileStat,
    /// Content description; files only.
    pub object: Option<Mac>,
    /// Symlinks only.
    pub link_target: Option<String>,
    /// Subtree aggregates; directories only.
    pub summary: Option<Summary>,
}

impl Entry {
    pub fn name(&self) -> &str {
        self.pathname.rsplit('/').next().unwrap_or(&self.pathname)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// One extended attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xattr {
    pub name: String,
    pub value: Vec<u8>,
}

/// All extended attributes of one path, stored as a blob and indexed by
/// the snapshot's xattr tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct XattrRecord {
    pub pathname: String,
    pub xattrs: Vec<Xattr>,
}

impl XattrRecord {
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Per-path error record, stored as an `error` blob and indexed by the
/// snapshot's error tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorItem {
    pub pathname: String,
    pub message: String,
}

impl ErrorItem {
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// The parent directory of an internal path, or None for the root.
pub fn parent_path(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(at) => Some(path[..at].to_string()),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrip() {
        let entry = Entry {
            pathname: "/a/b.txt".to_string(),
            kind: EntryKind::File,
            stat: FileStat {
                size: 11,
                mode: 0o644,
                mtime_ns: 1_700_000_000_000_000_000,
            },
            object: Some(Mac::from_bytes([1u8; 32])),
            link_target: None,
            summary: None,
        };
        let parsed = Entry::from_bytes(&entry.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.pathname, "/a/b.txt");
        assert_eq!(parsed.name(), "b.txt");
        assert_eq!(parsed.stat, entry.stat);
        assert!(!parsed.is_dir());
    }

    #[test]
    fn parent_paths() {
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("/a"), Some("/".to_string()));
        assert_eq!(parent_path("/a/b/c"), Some("/a/b".to_string()));
    }

    #[test]
    fn summary_aggregation() {
        let mut parent = Summary::default();
        parent.add_entry(EntryKind::File, 100);
        parent.add_entry(EntryKind::Symlink, 0);

        let mut child = Summary::default();
        child.add_entry(EntryKind::File, 50);
        child.directories = 1;

        parent.add_child_summary(&child);
        assert_eq!(parent.files, 2);
        assert_eq!(parent.symlinks, 1);
        assert_eq!(parent.directories, 1);
        assert_eq!(parent.total_size, 150);
    }
}
