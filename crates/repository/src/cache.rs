//! Per-repository disk caches.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<CACHE_VERSION>/repository/<repo-id>/states/<hex>
//! <root>/<CACHE_VERSION>/vfs/<repo-id>/<origin-hash>.cache
//! ```
//!
//! The repository cache is single-process-owned: a lock file is taken on
//! open and held until the handle is dropped. A second opener gets
//! `CacheInUse` instead of silently racing the first.

use crate::error::{RepositoryError, Result};
use silo_core::{HashingAlgorithm, Mac};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

pub const CACHE_VERSION: &str = "v1";

/// Root handle over the on-disk cache tree.
#[derive(Clone)]
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().join(CACHE_VERSION),
        }
    }

    /// Open (and lock) the state cache for one repository.
    pub async fn repository(&self, repository_id: Uuid) -> Result<RepositoryCache> {
        let dir = self
            .root
            .join("repository")
            .join(repository_id.to_string());
        fs::create_dir_all(dir.join("states")).await?;
        let lock = CacheLock::acquire(dir.join("LOCK"))?;
        Ok(RepositoryCache { dir, _lock: lock })
    }

    /// Path of the VFS cache file for one importer origin.
    pub async fn vfs_cache_path(&self, repository_id: Uuid, origin: &str) -> Result<PathBuf> {
        let dir = self.root.join("vfs").join(repository_id.to_string());
        fs::create_dir_all(&dir).await?;

        let mut hasher = HashingAlgorithm::Sha256.hasher();
        hasher.update(origin.as_bytes());
        let name = hasher.finalize().short();
        Ok(dir.join(format!("{name}.cache")))
    }
}

/// Exclusive lock file; removed on drop.
#[derive(Debug)]
struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write;
                let _ = write!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(RepositoryError::CacheInUse(path))
            }
            Err(e) => Err(RepositoryError::Storage(e.into())),
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Locked per-repository cache of decoded state deltas.
#[derive(Debug)]
pub struct RepositoryCache {
    dir: PathBuf,
    _lock: CacheLock,
}

impl RepositoryCache {
    fn state_path(&self, mac: Mac) -> PathBuf {
        self.dir.join("states").join(mac.to_hex())
    }

    pub async fn state_ids(&self) -> Result<Vec<Mac>> {
        let mut results = Vec::new();
        let mut entries = fs::read_dir(self.dir.join("states")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(mac) = Mac::from_hex(&entry.file_name().to_string_lossy()) {
                results.push(mac);
            }
        }
        Ok(results)
    }

    pub async fn put_state(&self, mac: Mac, plain: &[u8]) -> Result<()> {
        let path = self.state_path(mac);
        let temp = path.with_extension("tmp");
        fs::write(&temp, plain).await?;
        fs::rename(&temp, &path).await?;
        Ok(())
    }

    pub async fn get_state(&self, mac: Mac) -> Result<Vec<u8>> {
        fs::read(self.state_path(mac)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RepositoryError::Storage(silo_storage::StorageError::StateNotFound(mac.to_hex()))
            } else {
                RepositoryError::Storage(e.into())
            }
        })
    }

    pub async fn delete_state(&self, mac: Mac) -> Result<()> {
        match fs::remove_file(self.state_path(mac)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RepositoryError::Storage(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_cache_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(root.path());
        let repo_id = Uuid::new_v4();

        let cache = manager.repository(repo_id).await.unwrap();
        let mac = Mac::from_bytes([5u8; 32]);
        cache.put_state(mac, b"delta bytes").await.unwrap();

        assert_eq!(cache.state_ids().await.unwrap(), vec![mac]);
        assert_eq!(cache.get_state(mac).await.unwrap(), b"delta bytes");

        cache.delete_state(mac).await.unwrap();
        assert!(cache.state_ids().await.unwrap().is_empty());
        assert!(cache.get_state(mac).await.is_err());
    }

    #[tokio::test]
    async fn second_opener_gets_cache_in_use() {
        let root = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(root.path());
        let repo_id = Uuid::new_v4();

        let held = manager.repository(repo_id).await.unwrap();
        let err = manager.repository(repo_id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::CacheInUse(_)));

        drop(held);
        manager.repository(repo_id).await.unwrap();
    }

    #[tokio::test]
    async fn vfs_cache_path_is_stable_per_origin() {
        let root = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(root.path());
        let repo_id = Uuid::new_v4();

        let a = manager.vfs_cache_path(repo_id, "fs:/home").await.unwrap();
        let b = manager.vfs_cache_path(repo_id, "fs:/home").await.unwrap();
        let c = manager.vfs_cache_path(repo_id, "fs:/tmp").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
