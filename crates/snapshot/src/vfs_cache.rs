//! Local cache of (pathname -> object) from previous backups of the same
//! origin, keyed on mtime and size so unchanged files skip chunking.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use silo_core::Mac;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedFile {
    pub mtime_ns: i64,
    pub size: u64,
    pub object: Mac,
}

#[derive(Default, Serialize, Deserialize)]
pub struct VfsCache {
    files: HashMap<String, CachedFile>,
}

impl VfsCache {
    /// Load from disk; a missing or unreadable cache degrades to empty.
    pub async fn load(path: &Path) -> Self {
        match fs::read(path).await {
            Ok(data) => rmp_serde::from_slice(&data).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = rmp_serde::to_vec_named(self)?;
        let temp = path.with_extension("tmp");
        fs::write(&temp, &data).await?;
        fs::rename(&temp, path).await?;
        Ok(())
    }

    /// The cached object for a path, if mtime and size still match.
    pub fn lookup(&self, pathname: &str, mtime_ns: i64, size: u64) -> Option<Mac> {
        self.files.get(pathname).and_then(|cached| {
            (cached.mtime_ns == mtime_ns && cached.size == size).then_some(cached.object)
        })
    }

    pub fn record(&mut self, pathname: String, mtime_ns: i64, size: u64, object: Mac) {
        self.files.insert(
            pathname,
            CachedFile {
                mtime_ns,
                size,
                object,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vfs.cache");

        let mut cache = VfsCache::default();
        let mac = Mac::from_bytes([8u8; 32]);
        cache.record("/a.txt".to_string(), 1000, 5, mac);
        cache.save(&path).await.unwrap();

        let loaded = VfsCache::load(&path).await;
        assert_eq!(loaded.lookup("/a.txt", 1000, 5), Some(mac));
        // Any drift invalidates the hit.
        assert_eq!(loaded.lookup("/a.txt", 1001, 5), None);
        assert_eq!(loaded.lookup("/a.txt", 1000, 6), None);
        assert_eq!(loaded.lookup("/missing", 1000, 5), None);
    }

    #[tokio::test]
    async fn missing_cache_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VfsCache::load(&dir.path().join("absent")).await;
        assert_eq!(cache.lookup("/x", 0, 0), None);
    }
}
