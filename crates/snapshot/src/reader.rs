//! Snapshot reading: header, VFS resolution, content streaming.

use crate::btree::Tree;
use crate::error::{Result, SnapshotError};
use crate::header::SnapshotHeader;
use crate::vfs::{parent_path, Entry, EntryKind, Xattr, XattrRecord};
use bytes::Bytes;
use futures::Stream;
use silo_core::{Mac, Object, ResourceKind};
use silo_repository::{Repository, RepositoryError};
use std::sync::Arc;

/// An opened snapshot.
pub struct Snapshot {
    repository: Arc<Repository>,
    header: SnapshotHeader,
}

impl Snapshot {
    /// Resolve a snapshot id through the aggregate state and decode its
    /// header.
    pub async fn load(repository: Arc<Repository>, mac: Mac) -> Result<Self> {
        let bytes = repository
            .get_blob(ResourceKind::Snapshot, mac)
            .await
            .map_err(|e| match e {
                RepositoryError::BlobNotFound { .. } => SnapshotError::NotFound(mac),
                other => other.into(),
            })?;
        let header = SnapshotHeader::from_bytes(&bytes)?;
        Ok(Self { repository, header })
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Open the path index.
    pub async fn filesystem(&self) -> Result<Vfs<'_>> {
        let tree = Tree::open(&self.repository, self.header.vfs).await?;
        Ok(Vfs {
            repository: &self.repository,
            tree,
        })
    }

    /// Extended attributes recorded for one path; empty when none were
    /// captured.
    pub async fn xattrs(&self, pathname: &str) -> Result<Vec<Xattr>> {
        let tree = Tree::open(&self.repository, self.header.xattrs).await?;
        let Some(mac) = tree.get(pathname).await? else {
            return Ok(Vec::new());
        };
        let bytes = self
            .repository
            .get_blob(ResourceKind::VfsEntry, mac)
            .await?;
        Ok(XattrRecord::from_bytes(&bytes)?.xattrs)
    }

    /// Resolve a path to its object record.
    pub async fn object_for(&self, pathname: &str) -> Result<Object> {
        let vfs = self.filesystem().await?;
        let entry = vfs.entry(pathname).await?;
        let object_mac = entry
            .object
            .ok_or_else(|| SnapshotError::BadPath(format!("{pathname} is not a regular file")))?;
        let bytes = self
            .repository
            .get_blob(ResourceKind::Object, object_mac)
            .await?;
        Object::from_bytes(&bytes).map_err(Into::into)
    }

    /// Stream a file's bytes, chunk by chunk, through ranged packfile
    /// reads.
    pub async fn reader(
        &self,
        pathname: &str,
    ) -> Result<impl Stream<Item = Result<Bytes>> + Send + Unpin + '_> {
        let object = self.object_for(pathname).await?;
        let repository = Arc::clone(&self.repository);

        Ok(Box::pin(async_stream::try_stream! {
            for chunk in object.chunks {
                let data = repository.get_blob(ResourceKind::Chunk, chunk.mac).await?;
                if data.len() as u32 != chunk.length {
                    Err(SnapshotError::Core(silo_core::Error::Truncated(format!(
                        "chunk {} returned {} bytes, expected {}",
                        chunk.mac.short(),
                        data.len(),
                        chunk.length
                    ))))?;
                }
                yield data;
            }
        }))
    }

    /// Convenience read of a whole file.
    pub async fn read_to_vec(&self, pathname: &str) -> Result<Vec<u8>> {
        use futures::StreamExt;
        let mut stream = self.reader(pathname).await?;
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

/// Handle over the path -> entry index of one snapshot.
pub struct Vfs<'a> {
    repository: &'a Arc<Repository>,
    tree: Tree<'a>,
}

impl<'a> Vfs<'a> {
    pub async fn entry_mac(&self, pathname: &str) -> Result<Option<Mac>> {
        self.tree.get(pathname).await.map_err(Into::into)
    }

    pub async fn entry(&self, pathname: &str) -> Result<Entry> {
        let mac = self
            .entry_mac(pathname)
            .await?
            .ok_or_else(|| SnapshotError::BadPath(pathname.to_string()))?;
        let bytes = self
            .repository
            .get_blob(ResourceKind::VfsEntry, mac)
            .await?;
        Entry::from_bytes(&bytes)
    }

    /// Every (path, entry mac) pair, in path order.
    pub async fn pathnames(&self) -> Result<Vec<(String, Mac)>> {
        self.tree.entries().await.map_err(Into::into)
    }

    /// Immediate children of a directory, in name order.
    pub async fn children(&self, pathname: &str) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        for (path, mac) in self.tree.entries().await? {
            if parent_path(&path).as_deref() == Some(pathname) {
                let bytes = self
                    .repository
                    .get_blob(ResourceKind::VfsEntry, mac)
                    .await?;
                out.push(Entry::from_bytes(&bytes)?);
            }
        }
        Ok(out)
    }

    /// Visit every entry under a prefix, parents before children.
    pub async fn walk<F>(&self, prefix: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &Entry) -> bool,
    {
        for (path, mac) in self.tree.entries().await? {
            if !path_in_scope(&path, prefix) {
                continue;
            }
            let bytes = self
                .repository
                .get_blob(ResourceKind::VfsEntry, mac)
                .await?;
            let entry = Entry::from_bytes(&bytes)?;
            if !visit(&path, &entry) {
                break;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Whether `path` equals `prefix` or lives beneath it.
pub fn path_in_scope(path: &str, prefix: &str) -> bool {
    if prefix == "/" || path == prefix {
        return true;
    }
    path.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

/// Kinds whose MAC is the keyed hash of their payload. The snapshot header
/// is the exception: it is addressed by its random identifier.
pub fn content_addressed(kind: ResourceKind) -> bool {
    !matches!(kind, ResourceKind::Snapshot)
}

/// Entries summarized for `ls`-style listings.
pub struct ListedEntry {
    pub pathname: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub mtime_ns: i64,
}

impl Snapshot {
    /// Flat listing of a snapshot subtree.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ListedEntry>> {
        let vfs = self.filesystem().await?;
        let mut out = Vec::new();
        vfs.walk(prefix, |path, entry| {
            out.push(ListedEntry {
                pathname: path.to_string(),
                kind: entry.kind,
                size: entry.stat.size,
                mode: entry.stat.mode,
                mtime_ns: entry.stat.mtime_ns,
            });
            true
        })
        .await?;
        Ok(out)
    }
}
