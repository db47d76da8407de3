//! Store trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use silo_core::Mac;

/// Name of the cooperative lock serializing maintenance runs.
pub const MAINTENANCE_LOCK: &str = "maintenance";

/// Content-addressed storage over two namespaces, `state` and `packfile`.
///
/// A store provides per-operation atomicity and nothing more: writes land
/// under a temporary name and are renamed into place, reads of partially
/// written objects fail rather than returning short data, and coordination
/// between writers happens entirely through the state log layered on top.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    /// Initialize the store with the wrapped configuration. Fails with
    /// `AlreadyExists` if the store has been created before.
    async fn create(&self, config: Bytes) -> StorageResult<()>;

    /// Fetch the wrapped configuration written by `create`.
    async fn open(&self) -> StorageResult<Bytes>;

    async fn states(&self) -> StorageResult<Vec<Mac>>;
    async fn put_state(&self, mac: Mac, data: Bytes) -> StorageResult<()>;
    async fn get_state(&self, mac: Mac) -> StorageResult<Bytes>;
    async fn delete_state(&self, mac: Mac) -> StorageResult<()>;

    async fn packfiles(&self) -> StorageResult<Vec<Mac>>;
    async fn put_packfile(&self, mac: Mac, data: Bytes) -> StorageResult<()>;
    async fn get_packfile(&self, mac: Mac) -> StorageResult<Bytes>;

    /// Ranged read inside a stored packfile. `offset` is relative to the
    /// stored bytes (envelope included); the repository layer accounts for
    /// the storage header before calling this.
    async fn get_packfile_blob(&self, mac: Mac, offset: u64, length: u32) -> StorageResult<Bytes>;

    async fn delete_packfile(&self, mac: Mac) -> StorageResult<()>;

    /// Cooperative lock primitive. Returns true when the lock was acquired,
    /// false when another holder exists. Locks are advisory; only
    /// maintenance uses them.
    async fn try_lock(&self, name: &str) -> StorageResult<bool>;
    async fn unlock(&self, name: &str) -> StorageResult<()>;

    /// The location string this store was opened from.
    fn location(&self) -> &str;

    /// Static identifier for metrics and logging.
    fn backend_name(&self) -> &'static str;
}
