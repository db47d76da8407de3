//! In-memory store backend.
//!
//! Backs the `memory://` scheme. Used by the integration suites and as the
//! reference implementation of the store contract; cloning the handle shares
//! the underlying store, which is how tests model two writers against one
//! repository.

use crate::error::{StorageError, StorageResult};
use crate::traits::Store;
use async_trait::async_trait;
use bytes::Bytes;
use silo_core::Mac;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default, Debug)]
struct Inner {
    config: Option<Bytes>,
    states: HashMap<Mac, Bytes>,
    packfiles: HashMap<Mac, Bytes>,
    locks: HashSet<String>,
}

#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    location: String,
}

impl MemoryStore {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            location: location.into(),
        }
    }

    /// Total bytes currently held in the packfile namespace.
    pub async fn packfile_bytes(&self) -> u64 {
        let inner = self.inner.read().await;
        inner.packfiles.values().map(|b| b.len() as u64).sum()
    }

    /// Flip one byte inside a stored packfile. Test hook for corruption
    /// scenarios.
    pub async fn corrupt_packfile(&self, mac: Mac, position: usize) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let data = inner
            .packfiles
            .get(&mac)
            .ok_or_else(|| StorageError::PackfileNotFound(mac.to_hex()))?;
        let mut bytes = data.to_vec();
        let position = position % bytes.len();
        bytes[position] ^= 0xff;
        inner.packfiles.insert(mac, Bytes::from(bytes));
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create(&self, config: Bytes) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.config.is_some() {
            return Err(StorageError::AlreadyExists(self.location.clone()));
        }
        inner.config = Some(config);
        Ok(())
    }

    async fn open(&self) -> StorageResult<Bytes> {
        let inner = self.inner.read().await;
        inner
            .config
            .clone()
            .ok_or_else(|| StorageError::NotInitialized(self.location.clone()))
    }

    async fn states(&self) -> StorageResult<Vec<Mac>> {
        Ok(self.inner.read().await.states.keys().copied().collect())
    }

    async fn put_state(&self, mac: Mac, data: Bytes) -> StorageResult<()> {
        self.inner.write().await.states.insert(mac, data);
        Ok(())
    }

    async fn get_state(&self, mac: Mac) -> StorageResult<Bytes> {
        self.inner
            .read()
            .await
            .states
            .get(&mac)
            .cloned()
            .ok_or_else(|| StorageError::StateNotFound(mac.to_hex()))
    }

    async fn delete_state(&self, mac: Mac) -> StorageResult<()> {
        self.inner
            .write()
            .await
            .states
            .remove(&mac)
            .map(|_| ())
            .ok_or_else(|| StorageError::StateNotFound(mac.to_hex()))
    }

    async fn packfiles(&self) -> StorageResult<Vec<Mac>> {
        Ok(self.inner.read().await.packfiles.keys().copied().collect())
    }

    async fn put_packfile(&self, mac: Mac, data: Bytes) -> StorageResult<()> {
        self.inner.write().await.packfiles.insert(mac, data);
        Ok(())
    }

    async fn get_packfile(&self, mac: Mac) -> StorageResult<Bytes> {
        self.inner
            .read()
            .await
            .packfiles
            .get(&mac)
            .cloned()
            .ok_or_else(|| StorageError::PackfileNotFound(mac.to_hex()))
    }

    async fn get_packfile_blob(&self, mac: Mac, offset: u64, length: u32) -> StorageResult<Bytes> {
        let inner = self.inner.read().await;
        let data = inner
            .packfiles
            .get(&mac)
            .ok_or_else(|| StorageError::PackfileNotFound(mac.to_hex()))?;

        let start = usize::try_from(offset)
            .map_err(|_| StorageError::InvalidRange(format!("offset {offset} too large")))?;
        let end = start
            .checked_add(length as usize)
            .ok_or_else(|| StorageError::InvalidRange(format!("{offset}+{length} overflows")))?;
        if end > data.len() {
            return Err(StorageError::Truncated(format!(
                "range {start}..{end} beyond packfile of {} bytes",
                data.len()
            )));
        }
        Ok(data.slice(start..end))
    }

    async fn delete_packfile(&self, mac: Mac) -> StorageResult<()> {
        self.inner
            .write()
            .await
            .packfiles
            .remove(&mac)
            .map(|_| ())
            .ok_or_else(|| StorageError::PackfileNotFound(mac.to_hex()))
    }

    async fn try_lock(&self, name: &str) -> StorageResult<bool> {
        Ok(self.inner.write().await.locks.insert(name.to_string()))
    }

    async fn unlock(&self, name: &str) -> StorageResult<()> {
        self.inner.write().await.locks.remove(name);
        Ok(())
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_contents() {
        let a = MemoryStore::new("memory://shared");
        let b = a.clone();

        a.create(Bytes::from_static(b"cfg")).await.unwrap();
        assert_eq!(b.open().await.unwrap(), Bytes::from_static(b"cfg"));

        let mac = Mac::from_bytes([3u8; 32]);
        a.put_packfile(mac, Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        assert_eq!(
            b.get_packfile_blob(mac, 2, 3).await.unwrap(),
            Bytes::from_static(b"234")
        );
    }

    #[tokio::test]
    async fn corruption_hook_flips_one_byte() {
        let store = MemoryStore::new("memory://c");
        let mac = Mac::from_bytes([4u8; 32]);
        store
            .put_packfile(mac, Bytes::from_static(b"aaaa"))
            .await
            .unwrap();
        store.corrupt_packfile(mac, 1).await.unwrap();

        let data = store.get_packfile(mac).await.unwrap();
        assert_eq!(&data[..1], b"a");
        assert_ne!(data[1], b'a');
    }
}
