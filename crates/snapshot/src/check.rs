//! Snapshot verification.
//!
//! `fast` only proves presence: every reachable blob has a locate entry.
//! The full mode fetches each blob and recomputes its MAC (for
//! content-addressed kinds) so flipped bits anywhere in a packfile body
//! surface as failures on exactly the blobs that packfile carried.

use crate::error::Result;
use crate::reader::{content_addressed, path_in_scope, Snapshot};
use crate::walk::reachable_blobs;
use silo_core::{Mac, ResourceKind};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::instrument;

#[derive(Default)]
pub struct CheckOptions {
    pub fast: bool,
    /// Restrict the walk to one subtree.
    pub path: Option<String>,
}

/// Blobs already verified in this process run; shared across snapshots so
/// common blobs are hashed once.
#[derive(Default)]
pub struct CheckCache {
    verified: Mutex<HashSet<(ResourceKind, Mac)>>,
}

impl CheckCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn already_verified(&self, kind: ResourceKind, mac: Mac) -> bool {
        !self
            .verified
            .lock()
            .expect("check cache poisoned")
            .insert((kind, mac))
    }
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub checked: u64,
    pub skipped: u64,
    pub failures: Vec<String>,
}

impl CheckReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

#[instrument(skip_all, fields(snapshot = %snapshot.header().identifier.short()))]
pub async fn check(
    snapshot: &Snapshot,
    options: &CheckOptions,
    cache: &CheckCache,
) -> Result<CheckReport> {
    let repository = snapshot.repository();
    let mut report = CheckReport::default();

    let blobs = match &options.path {
        None => reachable_blobs(repository, snapshot.header().identifier).await?,
        Some(path) => scoped_blobs(snapshot, path).await?,
    };

    for (kind, mac) in blobs {
        if cache.already_verified(kind, mac) {
            report.skipped += 1;
            continue;
        }
        report.checked += 1;

        let location = match repository.locate(kind, mac).await {
            Some(location) => location,
            None => {
                report
                    .failures
                    .push(format!("{kind} {} has no locate entry", mac.short()));
                continue;
            }
        };
        if options.fast {
            continue;
        }

        match repository.get_blob_at(location).await {
            Ok(data) => {
                if content_addressed(kind) && repository.compute_mac(&data) != mac {
                    report.failures.push(format!(
                        "{kind} {} in packfile {}: MAC mismatch",
                        mac.short(),
                        location.packfile.short()
                    ));
                }
            }
            Err(e) => {
                report.failures.push(format!(
                    "{kind} {} in packfile {}: {e}",
                    mac.short(),
                    location.packfile.short()
                ));
            }
        }
    }

    Ok(report)
}

/// The reachable set restricted to entries under one path.
async fn scoped_blobs(snapshot: &Snapshot, prefix: &str) -> Result<Vec<(ResourceKind, Mac)>> {
    use crate::vfs::Entry;
    use silo_core::Object;

    let repository = snapshot.repository();
    let vfs = snapshot.filesystem().await?;
    let mut out = Vec::new();

    for (path, entry_mac) in vfs.pathnames().await? {
        if !path_in_scope(&path, prefix) {
            continue;
        }
        out.push((ResourceKind::VfsEntry, entry_mac));
        let entry = Entry::from_bytes(
            &repository
                .get_blob(ResourceKind::VfsEntry, entry_mac)
                .await?,
        )?;
        if let Some(object_mac) = entry.object {
            out.push((ResourceKind::Object, object_mac));
            let object = Object::from_bytes(
                &repository
                    .get_blob(ResourceKind::Object, object_mac)
                    .await?,
            )?;
            for chunk in &object.chunks {
                out.push((ResourceKind::Chunk, chunk.mac));
            }
        }
    }
    Ok(out)
}
