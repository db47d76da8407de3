//! The repository facade: everything above the store, below the snapshot
//! layer.

use crate::cache::{CacheManager, RepositoryCache};
use crate::codec::{decode_config, encode_config, Codec, Keys, STORAGE_HEADER_LEN};
use crate::error::{RepositoryError, Result};
use crate::packer::Packer;
use crate::packfile::{FinalizedPack, PackReader};
use crate::state::{LocalState, Location, StateDelta};
use bytes::Bytes;
use rand::RngCore;
use silo_core::{
    EncryptionConfig, HashingAlgorithm, KdfParams, Mac, RepositoryConfig, ResourceKind,
};
use silo_storage::Store;
use std::collections::HashSet;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

/// Default tombstone grace window.
pub const DEFAULT_GRACE: Duration = Duration::hours(1);

const MIN_PASSPHRASE_CHARS: usize = 12;

pub struct Repository {
    store: Arc<dyn Store>,
    config: RepositoryConfig,
    codec: Codec,
    state: RwLock<LocalState>,
    cache: RepositoryCache,
    grace: Duration,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Initialize a store with a fresh repository configuration. Fails if
    /// the store was created before.
    pub async fn create(
        store: &Arc<dyn Store>,
        mut config: RepositoryConfig,
        passphrase: Option<&str>,
    ) -> Result<()> {
        config.validate()?;

        if let Some(passphrase) = passphrase {
            if passphrase.chars().count() < MIN_PASSPHRASE_CHARS {
                return Err(silo_core::Error::WeakPassphrase(format!(
                    "need at least {MIN_PASSPHRASE_CHARS} characters"
                ))
                .into());
            }
            let mut salt = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut salt);
            let kdf = KdfParams::new(salt);
            let keys = Keys::derive(passphrase, &kdf)?;
            config.encryption = Some(EncryptionConfig {
                data_algorithm: "xchacha20-poly1305".to_string(),
                subkey_algorithm: "hmac-sha256".to_string(),
                chunk_size: 64 * 1024,
                kdf,
                canary: keys.seal_canary()?,
            });
        }

        let payload = config.to_bytes()?;
        store
            .create(Bytes::from(encode_config(&payload)))
            .await
            .map_err(Into::into)
    }

    /// Open a repository: read the configuration, derive keys, check the
    /// canary, lock the local cache and reconcile the state log.
    #[instrument(skip_all, fields(location = store.location()))]
    pub async fn open(
        store: Arc<dyn Store>,
        cache_manager: &CacheManager,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        let wrapped = store.open().await?;
        let (version, payload) = decode_config(&wrapped)?;
        let config = RepositoryConfig::from_bytes(version, &payload)?;

        let (mac_secret, data_key) = match (&config.encryption, passphrase) {
            (Some(encryption), Some(passphrase)) => {
                let keys = Keys::derive(passphrase, &encryption.kdf)?;
                keys.check_canary(&encryption.canary)?;
                (keys.mac_secret, Some(keys.data_key))
            }
            (Some(_), None) => {
                return Err(silo_core::Error::BadConfig(
                    "repository is encrypted, passphrase required".to_string(),
                )
                .into())
            }
            (None, _) => {
                // Unencrypted repositories still use keyed MACs: the secret
                // is derived from the repository id.
                let mut hasher = config.hashing.algorithm.hasher();
                hasher.update(config.repository_id.as_bytes());
                (*hasher.finalize().as_bytes(), None)
            }
        };

        let codec = Codec::new(
            config.hashing.algorithm,
            mac_secret,
            config.compression.clone(),
            data_key,
        );
        let cache = cache_manager.repository(config.repository_id).await?;

        let repository = Self {
            store,
            config,
            codec,
            state: RwLock::new(LocalState::new()),
            cache,
            grace: DEFAULT_GRACE,
        };
        repository.rebuild_state().await?;
        Ok(repository)
    }

    /// Reconcile the local state cache against the store: download missing
    /// deltas, purge stale ones, rebuild the in-memory aggregate.
    #[instrument(skip(self))]
    pub async fn rebuild_state(&self) -> Result<()> {
        let local = self.cache.state_ids().await?;
        let remote = self.store.states().await?;

        let local_set: HashSet<Mac> = local.iter().copied().collect();
        let remote_set: HashSet<Mac> = remote.iter().copied().collect();

        for mac in remote.iter().filter(|m| !local_set.contains(m)) {
            let wire = self.store.get_state(*mac).await?;
            let (_, plain) = self.codec.decode(ResourceKind::State, &wire).await?;
            self.cache.put_state(*mac, &plain).await?;
        }
        for mac in local.iter().filter(|m| !remote_set.contains(m)) {
            self.cache.delete_state(*mac).await?;
        }

        let mut aggregate = LocalState::new();
        for mac in &remote {
            let plain = self.cache.get_state(*mac).await?;
            aggregate.insert_state(*mac, StateDelta::from_bytes(&plain)?);
        }
        aggregate.update_serial_or(self.config.repository_id);

        *self.state.write().await = aggregate;
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn location(&self) -> &str {
        self.store.location()
    }

    pub(crate) fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    /// The keyed MAC over arbitrary bytes, with the repository's algorithm
    /// and secret.
    pub fn compute_mac(&self, data: &[u8]) -> Mac {
        self.codec.compute_mac(data)
    }

    pub fn mac_hasher(&self) -> silo_core::MacHasher {
        self.codec.mac_hasher()
    }

    pub fn hashing(&self) -> HashingAlgorithm {
        self.config.hashing.algorithm
    }

    // ----- aggregate state queries -----

    pub async fn locate(&self, kind: ResourceKind, mac: Mac) -> Option<Location> {
        self.state
            .read()
            .await
            .locate(kind, mac, self.grace, self.now())
    }

    pub async fn blob_exists(&self, kind: ResourceKind, mac: Mac) -> bool {
        self.locate(kind, mac).await.is_some()
    }

    pub async fn list_snapshots(&self) -> Vec<Mac> {
        self.state.read().await.list_snapshots()
    }

    pub async fn list_packfiles(&self) -> Vec<Mac> {
        self.state.read().await.list_packfiles()
    }

    pub async fn list_of_kind(&self, kind: ResourceKind) -> Vec<(Mac, Location)> {
        self.state.read().await.list_of_kind(kind)
    }

    pub async fn list_deleted(&self, kind: ResourceKind) -> Vec<(Mac, OffsetDateTime)> {
        self.state.read().await.list_deleted(kind)
    }

    pub async fn locations_in_packfile(&self, packfile: Mac) -> Vec<(ResourceKind, Mac)> {
        self.state.read().await.locations_in_packfile(packfile)
    }

    pub async fn newest_locate_per_packfile(
        &self,
    ) -> std::collections::HashMap<Mac, OffsetDateTime> {
        self.state.read().await.newest_locate_per_packfile()
    }

    // ----- blob access -----

    /// Fetch and decode one blob through its locate entry, using a ranged
    /// packfile read.
    #[instrument(skip(self), fields(kind = %kind, mac = %mac.short()))]
    pub async fn get_blob(&self, kind: ResourceKind, mac: Mac) -> Result<Bytes> {
        let location = self
            .locate(kind, mac)
            .await
            .ok_or(RepositoryError::BlobNotFound { kind, mac })?;
        self.get_blob_at(location).await
    }

    /// Fetch and decode a blob from an explicit location. The stored offset
    /// addresses the blob envelope; the ranged read skips its header.
    pub async fn get_blob_at(&self, location: Location) -> Result<Bytes> {
        let raw = self
            .store
            .get_packfile_blob(
                location.packfile,
                location.offset + STORAGE_HEADER_LEN as u64,
                location.length,
            )
            .await?;
        let plain = self.codec.decode_body(&raw).await?;
        Ok(Bytes::from(plain))
    }

    // ----- packfiles -----

    /// Fetch and parse a whole packfile, verifying its content MAC and its
    /// index MAC.
    #[instrument(skip(self), fields(mac = %mac.short()))]
    pub async fn get_packfile(&self, mac: Mac) -> Result<PackReader> {
        let bytes = self.store.get_packfile(mac).await?;
        if self.codec.compute_mac(&bytes[..]) != mac {
            return Err(silo_core::Error::BadMac.into());
        }
        PackReader::parse(&self.codec, bytes).await
    }

    pub(crate) async fn put_packfile(&self, pack: &FinalizedPack) -> Result<()> {
        self.store
            .put_packfile(pack.mac, pack.bytes.clone())
            .await
            .map_err(Into::into)
    }

    pub async fn delete_packfile(&self, mac: Mac) -> Result<()> {
        self.store.delete_packfile(mac).await.map_err(Into::into)
    }

    // ----- state deltas -----

    /// A fresh writable delta for one transaction.
    pub async fn derive_delta(&self) -> StateDelta {
        self.state.read().await.derive()
    }

    /// Serialize, upload and merge a delta. The snapshot (or removal) it
    /// describes becomes observable to other processes exactly when the
    /// upload returns.
    #[instrument(skip_all, fields(serial = %delta.serial))]
    pub async fn commit_delta(&self, delta: StateDelta) -> Result<Mac> {
        let plain = delta.to_bytes()?;
        let mac = self.compute_mac(delta.serial.as_bytes());
        let wire = self.codec.encode(ResourceKind::State, &plain).await?;

        self.store.put_state(mac, Bytes::from(wire)).await?;
        self.cache.put_state(mac, &plain).await?;
        self.state.write().await.insert_state(mac, delta);
        Ok(mac)
    }

    pub async fn states(&self) -> Result<Vec<Mac>> {
        self.store.states().await.map_err(Into::into)
    }

    /// Fetch and parse one state delta from the store.
    pub async fn get_state_delta(&self, mac: Mac) -> Result<StateDelta> {
        let wire = self.store.get_state(mac).await?;
        let (_, plain) = self.codec.decode(ResourceKind::State, &wire).await?;
        StateDelta::from_bytes(&plain)
    }

    pub async fn delete_state(&self, mac: Mac) -> Result<()> {
        self.store.delete_state(mac).await?;
        self.cache.delete_state(mac).await?;
        self.state.write().await.remove_state(mac);
        Ok(())
    }

    /// Tombstone a snapshot. The id disappears from listings at once; the
    /// blobs it referenced are reclaimed by maintenance after the grace
    /// window.
    #[instrument(skip(self), fields(mac = %snapshot.short()))]
    pub async fn delete_snapshot(&self, snapshot: Mac) -> Result<Mac> {
        if !self.list_snapshots().await.contains(&snapshot) {
            return Err(RepositoryError::SnapshotNotFound(snapshot));
        }
        let mut delta = self.derive_delta().await;
        delta.push_tombstone(ResourceKind::Snapshot, snapshot, self.now());
        self.commit_delta(delta).await
    }

    /// Drop the in-memory locate entries of a swept packfile, returning the
    /// keys removed so the sweep delta can tombstone them.
    pub(crate) async fn forget_packfile(&self, packfile: Mac) -> Vec<(ResourceKind, Mac)> {
        self.state
            .write()
            .await
            .remove_locations_of_packfile(packfile)
    }

    // ----- packer -----

    /// Start a packer transaction feeding this repository.
    pub fn start_packer(self: &Arc<Self>) -> Packer {
        Packer::spawn(Arc::clone(self), StateDelta::new(Uuid::new_v4()))
    }
}

/// Maintenance entry points, grouped so the sweep logic stays next to the
/// state mutations it performs.
impl Repository {
    /// Acquire the cooperative maintenance lock.
    pub async fn lock_maintenance(&self) -> Result<()> {
        if self
            .store
            .try_lock(silo_storage::MAINTENANCE_LOCK)
            .await?
        {
            Ok(())
        } else {
            Err(RepositoryError::LockHeld)
        }
    }

    pub async fn unlock_maintenance(&self) -> Result<()> {
        self.store
            .unlock(silo_storage::MAINTENANCE_LOCK)
            .await
            .map_err(Into::into)
    }

    /// Sweep one colored packfile: delete it from the store and record the
    /// tombstones (packfile plus every blob it carried) into the delta.
    pub async fn sweep_packfile(&self, delta: &mut StateDelta, packfile: Mac) -> Result<()> {
        let now = self.now();
        match self.store.delete_packfile(packfile).await {
            Ok(()) => {}
            // Already gone: converge rather than fail.
            Err(silo_storage::StorageError::PackfileNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        delta.push_tombstone(ResourceKind::Packfile, packfile, now);
        for (kind, mac) in self.forget_packfile(packfile).await {
            delta.push_tombstone(kind, mac, now);
        }
        Ok(())
    }
}
