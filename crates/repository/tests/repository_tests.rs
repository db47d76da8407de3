//! End-to-end tests of the repository engine against in-memory stores.

use bytes::Bytes;
use silo_core::{Mac, RepositoryConfig, ResourceKind};
use silo_repository::{CacheManager, Repository, RepositoryError};
use silo_storage::{MemoryStore, Store};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

fn fresh_config() -> RepositoryConfig {
    RepositoryConfig::new(Uuid::new_v4(), OffsetDateTime::now_utc())
}

fn memory_store(name: &str) -> (Arc<dyn Store>, MemoryStore) {
    let store = MemoryStore::new(format!("memory://{name}"));
    (Arc::new(store.clone()), store)
}

async fn open_repo(store: &Arc<dyn Store>, cache: &tempfile::TempDir) -> Arc<Repository> {
    let manager = CacheManager::new(cache.path());
    Arc::new(
        Repository::open(Arc::clone(store), &manager, None)
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn create_pack_and_read_back() {
    let (store, _) = memory_store(&Uuid::new_v4().to_string());
    Repository::create(&store, fresh_config(), None)
        .await
        .unwrap();

    let cache = tempfile::tempdir().unwrap();
    let repo = open_repo(&store, &cache).await;

    let payloads: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i; 3000]).collect();
    let packer = repo.start_packer();
    let mut macs = Vec::new();
    for payload in &payloads {
        let mac = repo.compute_mac(payload);
        macs.push(mac);
        assert!(!packer.insert_if_not_present(ResourceKind::Chunk, mac));
        packer
            .put(ResourceKind::Chunk, mac, Bytes::from(payload.clone()))
            .await
            .unwrap();
    }
    let delta = packer.wait().await.unwrap();
    assert_eq!(delta.locates.len(), payloads.len());
    repo.commit_delta(delta).await.unwrap();

    for (mac, payload) in macs.iter().zip(&payloads) {
        assert!(repo.blob_exists(ResourceKind::Chunk, *mac).await);
        let data = repo.get_blob(ResourceKind::Chunk, *mac).await.unwrap();
        assert_eq!(&data[..], &payload[..]);
    }

    // Every referenced packfile parses and covers its blobs.
    for packfile in repo.list_packfiles().await {
        let reader = repo.get_packfile(packfile).await.unwrap();
        assert!(reader.footer().count > 0);
    }
}

#[tokio::test]
async fn inflight_dedup_is_claimed_once() {
    let (store, _) = memory_store(&Uuid::new_v4().to_string());
    Repository::create(&store, fresh_config(), None)
        .await
        .unwrap();
    let cache = tempfile::tempdir().unwrap();
    let repo = open_repo(&store, &cache).await;

    let packer = repo.start_packer();
    let mac = repo.compute_mac(b"same chunk");
    assert!(!packer.insert_if_not_present(ResourceKind::Chunk, mac));
    assert!(packer.insert_if_not_present(ResourceKind::Chunk, mac));

    packer
        .put(ResourceKind::Chunk, mac, Bytes::from_static(b"same chunk"))
        .await
        .unwrap();
    let delta = packer.wait().await.unwrap();
    assert_eq!(delta.locates.len(), 1);
    repo.commit_delta(delta).await.unwrap();
}

#[tokio::test]
async fn oversized_blob_lands_alone() {
    let (store, _) = memory_store(&Uuid::new_v4().to_string());
    let mut config = fresh_config();
    config.packfile.max_size = 8 * 1024;
    config.compression = None;
    Repository::create(&store, config, None).await.unwrap();

    let cache = tempfile::tempdir().unwrap();
    let repo = open_repo(&store, &cache).await;
    let max = repo.config().packfile.max_size;

    let packer = repo.start_packer();
    let big = vec![0xabu8; 3 * max as usize];
    let big_mac = repo.compute_mac(&big);
    packer
        .put(ResourceKind::Chunk, big_mac, Bytes::from(big))
        .await
        .unwrap();
    for i in 0u8..16 {
        let data = vec![i; 1024];
        let mac = repo.compute_mac(&data);
        packer
            .put(ResourceKind::Chunk, mac, Bytes::from(data))
            .await
            .unwrap();
    }
    let delta = packer.wait().await.unwrap();
    repo.commit_delta(delta).await.unwrap();

    // The oversized blob's packfile holds only that blob; every other
    // packfile stays under twice the cap.
    for packfile in repo.list_packfiles().await {
        let reader = repo.get_packfile(packfile).await.unwrap();
        let blobs = repo.locations_in_packfile(packfile).await;
        if blobs.iter().any(|(_, mac)| *mac == big_mac) {
            assert_eq!(reader.footer().count, 1);
        } else {
            let bytes = store.get_packfile(packfile).await.unwrap();
            assert!(bytes.len() as u64 <= 2 * max);
        }
    }
}

#[tokio::test]
async fn encrypted_repository_rejects_wrong_passphrase() {
    let (store, _) = memory_store(&Uuid::new_v4().to_string());
    Repository::create(&store, fresh_config(), Some("correct horse battery staple"))
        .await
        .unwrap();

    let cache = tempfile::tempdir().unwrap();
    let manager = CacheManager::new(cache.path());

    let err = Repository::open(Arc::clone(&store), &manager, Some("wrong zebra battery staple"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Core(silo_core::Error::BadCanary)
    ));

    let err = Repository::open(Arc::clone(&store), &manager, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Core(silo_core::Error::BadConfig(_))
    ));

    let repo = Repository::open(store, &manager, Some("correct horse battery staple"))
        .await
        .unwrap();
    assert!(repo.config().encryption.is_some());
}

#[tokio::test]
async fn weak_passphrase_is_refused_at_create() {
    let (store, _) = memory_store(&Uuid::new_v4().to_string());
    let err = Repository::create(&store, fresh_config(), Some("short"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Core(silo_core::Error::WeakPassphrase(_))
    ));
}

#[tokio::test]
async fn second_handle_converges_on_first_writers_state() {
    let (store, _) = memory_store(&Uuid::new_v4().to_string());
    Repository::create(&store, fresh_config(), None)
        .await
        .unwrap();

    let cache_a = tempfile::tempdir().unwrap();
    let repo_a = open_repo(&store, &cache_a).await;

    let packer = repo_a.start_packer();
    let mac = repo_a.compute_mac(b"shared blob");
    packer
        .put(ResourceKind::Chunk, mac, Bytes::from_static(b"shared blob"))
        .await
        .unwrap();
    let delta = packer.wait().await.unwrap();
    repo_a.commit_delta(delta).await.unwrap();

    // A second writer with its own cache reconciles the same aggregate.
    let cache_b = tempfile::tempdir().unwrap();
    let repo_b = open_repo(&store, &cache_b).await;
    assert!(repo_b.blob_exists(ResourceKind::Chunk, mac).await);
    assert_eq!(
        repo_b.get_blob(ResourceKind::Chunk, mac).await.unwrap(),
        Bytes::from_static(b"shared blob")
    );
}

#[tokio::test]
async fn stale_cached_state_is_purged_on_rebuild() {
    let (store, _) = memory_store(&Uuid::new_v4().to_string());
    Repository::create(&store, fresh_config(), None)
        .await
        .unwrap();

    let cache = tempfile::tempdir().unwrap();
    let repo = open_repo(&store, &cache).await;

    let packer = repo.start_packer();
    let mac = repo.compute_mac(b"doomed");
    packer
        .put(ResourceKind::Chunk, mac, Bytes::from_static(b"doomed"))
        .await
        .unwrap();
    let delta = packer.wait().await.unwrap();
    let state_mac = repo.commit_delta(delta).await.unwrap();
    assert!(repo.blob_exists(ResourceKind::Chunk, mac).await);

    // Someone else removes the delta from the store; rebuild must purge it
    // from the local cache and the aggregate.
    store.delete_state(state_mac).await.unwrap();
    repo.rebuild_state().await.unwrap();
    assert!(!repo.blob_exists(ResourceKind::Chunk, mac).await);
}

#[tokio::test]
async fn removed_snapshot_disappears_from_listing() {
    let (store, _) = memory_store(&Uuid::new_v4().to_string());
    Repository::create(&store, fresh_config(), None)
        .await
        .unwrap();
    let cache = tempfile::tempdir().unwrap();
    let repo = open_repo(&store, &cache).await;

    let snap_mac = Mac::from_bytes([9u8; 32]);
    let packer = repo.start_packer();
    packer
        .put(
            ResourceKind::Snapshot,
            snap_mac,
            Bytes::from_static(b"header"),
        )
        .await
        .unwrap();
    let delta = packer.wait().await.unwrap();
    repo.commit_delta(delta).await.unwrap();
    assert_eq!(repo.list_snapshots().await, vec![snap_mac]);

    repo.delete_snapshot(snap_mac).await.unwrap();
    assert!(repo.list_snapshots().await.is_empty());

    let err = repo.delete_snapshot(snap_mac).await.unwrap_err();
    assert!(matches!(err, RepositoryError::SnapshotNotFound(_)));
}
