//! The silo repository engine.
//!
//! This crate owns everything between the store and the snapshot layer:
//! - The codec pipeline every stored byte passes through
//! - The packfile container format, writer and parser
//! - The state log (per-writer deltas) and the local aggregate
//! - The per-repository disk cache with its single-process lock
//! - The packer pipeline batching blobs into packfiles
//! - The repository facade tying these together

pub mod cache;
pub mod codec;
pub mod error;
pub mod packer;
pub mod packfile;
pub mod repository;
pub mod retry;
pub mod state;

pub use cache::{CacheManager, RepositoryCache, CACHE_VERSION};
pub use codec::{decode_config, encode_config, Codec, Keys, STORAGE_HEADER_LEN, STORAGE_MAGIC};
pub use error::{RepositoryError, Result};
pub use packer::{Packer, PackerMsg};
pub use packfile::{FinalizedPack, IndexEntry, PackReader, PackWriter};
pub use repository::{Repository, DEFAULT_GRACE};
pub use retry::retry_read;
pub use state::{LocalState, LocateEvent, Location, StateDelta, TombstoneEvent};
