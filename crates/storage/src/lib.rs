//! Object storage abstraction and backends for silo.
//!
//! This crate provides:
//! - The narrow [`Store`] trait: content-addressed get/put/delete/list over
//!   the `state` and `packfile` namespaces, plus ranged packfile reads and a
//!   cooperative lock primitive
//! - Backends: local filesystem (`fs://`, bare paths) and in-memory
//!   (`memory://`)
//! - The extensible scheme registry used to plug in additional backends

pub mod backends;
pub mod error;
pub mod registry;
pub mod traits;

pub use backends::{FilesystemStore, MemoryStore};
pub use error::{StorageError, StorageResult};
pub use registry::{new_store, register_backend, StoreFactory};
pub use traits::{Store, MAINTENANCE_LOCK};
