//! Snapshots: building, reading, verifying and maintaining them.
//!
//! The builder scans an importer into chunk/object/entry blobs through the
//! repository's packer; the reader resolves paths back to bytes; check,
//! restore, sync and maintenance operate on the committed graph.

pub mod btree;
pub mod builder;
pub mod check;
pub mod chunker;
pub mod error;
pub mod exporter;
pub mod header;
pub mod importer;
pub mod maintenance;
mod put;
pub mod reader;
pub mod restore;
pub mod sync;
pub mod vfs;
pub mod vfs_cache;
pub mod walk;

pub use builder::{backup, BackupOptions, BackupOutcome};
pub use check::{check, CheckCache, CheckOptions, CheckReport};
pub use chunker::chunkify;
pub use error::{Result, SnapshotError};
pub use exporter::{Exporter, FsExporter};
pub use header::{ImporterInfo, SnapshotHeader};
pub use importer::{FsImporter, Importer, ScanRecord, ScanResult};
pub use maintenance::{maintenance, MaintenanceOptions, MaintenanceStats};
pub use reader::{ListedEntry, Snapshot, Vfs};
pub use restore::{restore, RestoreStats};
pub use sync::{sync, SyncStats};
pub use vfs::{Entry, EntryKind, ErrorItem, FileStat, Summary, Xattr, XattrRecord};
pub use walk::reachable_blobs;
