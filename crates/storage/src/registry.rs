//! URL-scheme to backend dispatch.

use crate::backends::{FilesystemStore, MemoryStore};
use crate::error::{StorageError, StorageResult};
use crate::traits::Store;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

/// Factory invoked with the full location string.
pub type StoreFactory =
    fn(String) -> BoxFuture<'static, StorageResult<Arc<dyn Store>>>;

static FACTORIES: LazyLock<Mutex<HashMap<String, StoreFactory>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

// memory:// stores are shared per location so that several handles opened in
// one process observe one repository, the way two processes share an fs://
// store.
static MEMORY_STORES: LazyLock<Mutex<HashMap<String, MemoryStore>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Register a backend for an additional scheme (`s3`, `sftp`, `ptar`, ...).
///
/// Intended for process start; later registrations for the same scheme
/// replace the earlier one.
pub fn register_backend(scheme: &str, factory: StoreFactory) {
    FACTORIES
        .lock()
        .expect("store registry poisoned")
        .insert(scheme.to_string(), factory);
}

fn split_scheme(location: &str) -> (&str, &str) {
    match location.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        // Bare paths are filesystem stores.
        None => ("fs", location),
    }
}

/// Open a store handle for a location string, dispatching on its scheme.
pub async fn new_store(location: &str) -> StorageResult<Arc<dyn Store>> {
    let (scheme, rest) = split_scheme(location);
    match scheme {
        "fs" => Ok(Arc::new(FilesystemStore::new(rest, location))),
        "memory" => {
            let store = MEMORY_STORES
                .lock()
                .expect("memory store registry poisoned")
                .entry(location.to_string())
                .or_insert_with(|| MemoryStore::new(location))
                .clone();
            Ok(Arc::new(store))
        }
        other => {
            let factory = FACTORIES
                .lock()
                .expect("store registry poisoned")
                .get(other)
                .copied();
            match factory {
                Some(factory) => factory(location.to_string()).await,
                None => Err(StorageError::UnsupportedScheme(other.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn bare_path_is_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(&dir.path().display().to_string()).await.unwrap();
        assert_eq!(store.backend_name(), "fs");
    }

    #[tokio::test]
    async fn memory_locations_are_shared() {
        let a = new_store("memory://registry-shared").await.unwrap();
        let b = new_store("memory://registry-shared").await.unwrap();

        a.create(Bytes::from_static(b"cfg")).await.unwrap();
        assert_eq!(b.open().await.unwrap(), Bytes::from_static(b"cfg"));

        let c = new_store("memory://registry-other").await.unwrap();
        assert!(c.open().await.is_err());
    }

    #[tokio::test]
    async fn unknown_scheme_is_refused() {
        let err = new_store("gopher://nope").await.unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedScheme(_)));
    }
}
