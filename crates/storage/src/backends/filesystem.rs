//! Local filesystem store backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::Store;
use async_trait::async_trait;
use bytes::Bytes;
use silo_core::Mac;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

const CONFIG_FILE: &str = "CONFIG";
const STATES_DIR: &str = "states";
const PACKFILES_DIR: &str = "packfiles";
const LOCKS_DIR: &str = "locks";

/// Store rooted at a local directory.
///
/// Objects fan out under two-hex-digit subdirectories to keep directory
/// sizes bounded: `states/ab/<hex>` and `packfiles/ab/<hex>`.
#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
    location: String,
}

impl FilesystemStore {
    pub fn new(root: impl AsRef<Path>, location: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            location: location.into(),
        }
    }

    fn object_path(&self, namespace: &str, mac: Mac) -> PathBuf {
        let hex = mac.to_hex();
        self.root.join(namespace).join(&hex[..2]).join(hex)
    }

    fn lock_path(&self, name: &str) -> StorageResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(StorageError::InvalidKey(format!("bad lock name: {name}")));
        }
        Ok(self.root.join(LOCKS_DIR).join(name))
    }

    /// Write to a unique temporary name, fsync, then rename into place.
    async fn atomic_write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!(".tmp.{file_name}.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp, path).await?;
        Ok(())
    }

    async fn list_namespace(&self, namespace: &str) -> StorageResult<Vec<Mac>> {
        let base = self.root.join(namespace);
        let mut results = Vec::new();

        let mut outer = match fs::read_dir(&base).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(StorageError::Io(e)),
        };

        while let Some(shard) = outer.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut inner = fs::read_dir(shard.path()).await?;
            while let Some(entry) = inner.next_entry().await? {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                // In-progress temporaries are skipped, not errors.
                if name.starts_with(".tmp.") {
                    continue;
                }
                if let Ok(mac) = Mac::from_hex(&name) {
                    results.push(mac);
                }
            }
        }
        Ok(results)
    }

    async fn read_object(&self, namespace: &str, mac: Mac) -> StorageResult<Bytes> {
        let path = self.object_path(namespace, mac);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => match namespace {
                STATES_DIR => Err(StorageError::StateNotFound(mac.to_hex())),
                _ => Err(StorageError::PackfileNotFound(mac.to_hex())),
            },
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete_object(&self, namespace: &str, mac: Mac) -> StorageResult<()> {
        let path = self.object_path(namespace, mac);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => match namespace {
                STATES_DIR => Err(StorageError::StateNotFound(mac.to_hex())),
                _ => Err(StorageError::PackfileNotFound(mac.to_hex())),
            },
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[async_trait]
impl Store for FilesystemStore {
    #[instrument(skip(self, config), fields(backend = "fs"))]
    async fn create(&self, config: Bytes) -> StorageResult<()> {
        let config_path = self.root.join(CONFIG_FILE);
        if fs::try_exists(&config_path).await? {
            return Err(StorageError::AlreadyExists(self.location.clone()));
        }

        fs::create_dir_all(self.root.join(STATES_DIR)).await?;
        fs::create_dir_all(self.root.join(PACKFILES_DIR)).await?;
        fs::create_dir_all(self.root.join(LOCKS_DIR)).await?;
        self.atomic_write(&config_path, &config).await
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn open(&self) -> StorageResult<Bytes> {
        match fs::read(self.root.join(CONFIG_FILE)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotInitialized(self.location.clone()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn states(&self) -> StorageResult<Vec<Mac>> {
        self.list_namespace(STATES_DIR).await
    }

    #[instrument(skip(self, data), fields(backend = "fs", size = data.len()))]
    async fn put_state(&self, mac: Mac, data: Bytes) -> StorageResult<()> {
        self.atomic_write(&self.object_path(STATES_DIR, mac), &data)
            .await
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn get_state(&self, mac: Mac) -> StorageResult<Bytes> {
        self.read_object(STATES_DIR, mac).await
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn delete_state(&self, mac: Mac) -> StorageResult<()> {
        self.delete_object(STATES_DIR, mac).await
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn packfiles(&self) -> StorageResult<Vec<Mac>> {
        self.list_namespace(PACKFILES_DIR).await
    }

    #[instrument(skip(self, data), fields(backend = "fs", size = data.len()))]
    async fn put_packfile(&self, mac: Mac, data: Bytes) -> StorageResult<()> {
        self.atomic_write(&self.object_path(PACKFILES_DIR, mac), &data)
            .await
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn get_packfile(&self, mac: Mac) -> StorageResult<Bytes> {
        self.read_object(PACKFILES_DIR, mac).await
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn get_packfile_blob(&self, mac: Mac, offset: u64, length: u32) -> StorageResult<Bytes> {
        let path = self.object_path(PACKFILES_DIR, mac);
        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::PackfileNotFound(mac.to_hex()))
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let size = file.metadata().await?.len();
        let end = offset
            .checked_add(u64::from(length))
            .ok_or_else(|| StorageError::InvalidRange(format!("{offset}+{length} overflows")))?;
        if end > size {
            return Err(StorageError::Truncated(format!(
                "range {offset}..{end} beyond packfile of {size} bytes"
            )));
        }

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                StorageError::Truncated(format!("short read at {offset} in {}", mac.short()))
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Bytes::from(buf))
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn delete_packfile(&self, mac: Mac) -> StorageResult<()> {
        self.delete_object(PACKFILES_DIR, mac).await
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn try_lock(&self, name: &str) -> StorageResult<bool> {
        let path = self.lock_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(std::process::id().to_string().as_bytes())
                    .await?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "fs"))]
    async fn unlock(&self, name: &str) -> StorageResult<()> {
        let path = self.lock_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn backend_name(&self) -> &'static str {
        "fs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(seed: u8) -> Mac {
        Mac::from_bytes([seed; 32])
    }

    async fn created_store(dir: &Path) -> FilesystemStore {
        let store = FilesystemStore::new(dir, format!("fs://{}", dir.display()));
        store.create(Bytes::from_static(b"cfg")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_is_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = created_store(dir.path()).await;

        let err = store.create(Bytes::from_static(b"other")).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(store.open().await.unwrap(), Bytes::from_static(b"cfg"));
    }

    #[tokio::test]
    async fn open_uninitialized_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path(), "fs://x");
        assert!(matches!(
            store.open().await.unwrap_err(),
            StorageError::NotInitialized(_)
        ));
    }

    #[tokio::test]
    async fn state_roundtrip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = created_store(dir.path()).await;

        store
            .put_state(mac(1), Bytes::from_static(b"delta-1"))
            .await
            .unwrap();
        store
            .put_state(mac(2), Bytes::from_static(b"delta-2"))
            .await
            .unwrap();

        let mut listed = store.states().await.unwrap();
        listed.sort();
        assert_eq!(listed, vec![mac(1), mac(2)]);
        assert_eq!(
            store.get_state(mac(1)).await.unwrap(),
            Bytes::from_static(b"delta-1")
        );

        store.delete_state(mac(1)).await.unwrap();
        assert!(matches!(
            store.get_state(mac(1)).await.unwrap_err(),
            StorageError::StateNotFound(_)
        ));
    }

    #[tokio::test]
    async fn ranged_packfile_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = created_store(dir.path()).await;

        store
            .put_packfile(mac(9), Bytes::from_static(b"hello packfile body"))
            .await
            .unwrap();

        let blob = store.get_packfile_blob(mac(9), 6, 8).await.unwrap();
        assert_eq!(blob, Bytes::from_static(b"packfile"));

        let err = store.get_packfile_blob(mac(9), 16, 100).await.unwrap_err();
        assert!(matches!(err, StorageError::Truncated(_)));
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = created_store(dir.path()).await;

        assert!(store.try_lock("maintenance").await.unwrap());
        assert!(!store.try_lock("maintenance").await.unwrap());
        store.unlock("maintenance").await.unwrap();
        assert!(store.try_lock("maintenance").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_traversal_in_lock_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = created_store(dir.path()).await;
        assert!(store.try_lock("../escape").await.is_err());
    }
}
