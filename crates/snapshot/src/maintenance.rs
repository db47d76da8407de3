//! Maintenance: two-phase mark and sweep over the state log.
//!
//! Mark intersects the live set (blobs reachable from snapshots that are
//! not tombstoned, plus snapshots whose tombstone is still inside the grace
//! window) with the locate index; a packfile with no live blob, or one
//! tombstoned past the grace window, is colored. Sweep deletes colored
//! packfiles and records a delta tombstoning the packfile and every blob it
//! carried. A packfile whose newest locate entry is younger than the grace
//! window is never touched, whatever the mark said.

use crate::error::{Result, SnapshotError};
use crate::walk::reachable_blobs;
use silo_core::{Mac, ResourceKind};
use silo_repository::Repository;
use std::collections::HashSet;
use std::sync::Arc;
use time::Duration;
use tracing::{info, instrument, warn};

pub struct MaintenanceOptions {
    pub grace: Duration,
    pub dry_run: bool,
}

impl Default for MaintenanceOptions {
    fn default() -> Self {
        Self {
            grace: silo_repository::DEFAULT_GRACE,
            dry_run: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct MaintenanceStats {
    pub packfiles_scanned: u64,
    pub packfiles_deleted: u64,
    pub blobs_dropped: u64,
    pub snapshots_reclaimed: u64,
    /// Packfiles present in the store with no state entry at all. These are
    /// cancelled-backup leftovers; they are reported, not deleted, and
    /// `repair` owns them.
    pub orphan_packfiles: u64,
}

#[instrument(skip_all, fields(location = repository.location()))]
pub async fn maintenance(
    repository: Arc<Repository>,
    options: &MaintenanceOptions,
) -> Result<MaintenanceStats> {
    repository.lock_maintenance().await?;
    let result = run_locked(&repository, options).await;
    if let Err(e) = repository.unlock_maintenance().await {
        warn!("failed to release maintenance lock: {e}");
    }
    result
}

async fn run_locked(
    repository: &Arc<Repository>,
    options: &MaintenanceOptions,
) -> Result<MaintenanceStats> {
    repository.rebuild_state().await?;
    let now = repository.now();
    let mut stats = MaintenanceStats::default();

    // Mark: walk every snapshot that is still protected. A tombstoned
    // snapshot inside the grace window counts as live so concurrent readers
    // can finish restoring it.
    let mut protected: Vec<Mac> = repository.list_snapshots().await;
    for (mac, when) in repository.list_deleted(ResourceKind::Snapshot).await {
        if now - when < options.grace {
            protected.push(mac);
        }
    }

    let mut live: HashSet<(ResourceKind, Mac)> = HashSet::new();
    for snapshot in protected {
        match reachable_blobs(repository, snapshot).await {
            Ok(blobs) => live.extend(blobs),
            // A snapshot that no longer fully resolves must not widen the
            // sweep; fail the pass instead of guessing.
            Err(e) => {
                return Err(SnapshotError::Repository(
                    silo_repository::RepositoryError::RepairNeeded(format!(
                        "snapshot {} is not fully resolvable: {e}",
                        snapshot.short()
                    )),
                ))
            }
        }
    }

    let newest_locate = repository.newest_locate_per_packfile().await;
    let mut colored: Vec<Mac> = Vec::new();

    for packfile in repository.list_packfiles().await {
        stats.packfiles_scanned += 1;

        let blobs = repository.locations_in_packfile(packfile).await;
        let has_live = blobs.iter().any(|key| live.contains(key));
        if has_live {
            continue;
        }
        // Never sweep under recent writers: clock skew tolerance.
        if let Some(when) = newest_locate.get(&packfile) {
            if now - *when < options.grace {
                continue;
            }
        }
        colored.push(packfile);
    }

    for (packfile, when) in repository.list_deleted(ResourceKind::Packfile).await {
        if now - when >= options.grace && !colored.contains(&packfile) {
            colored.push(packfile);
        }
    }

    // Orphans: uploaded but never referenced by any delta (cancelled
    // backups). Counted for `repair`, never swept here.
    let known: HashSet<Mac> = repository.list_packfiles().await.into_iter().collect();
    for packfile in repository.store().packfiles().await? {
        if !known.contains(&packfile) {
            stats.orphan_packfiles += 1;
        }
    }

    if options.dry_run {
        stats.packfiles_deleted = colored.len() as u64;
        return Ok(stats);
    }

    // Sweep.
    let mut delta = repository.derive_delta().await;
    for packfile in colored {
        let dropped = repository.locations_in_packfile(packfile).await.len();
        repository.sweep_packfile(&mut delta, packfile).await?;
        stats.packfiles_deleted += 1;
        stats.blobs_dropped += dropped as u64;
    }

    for (snapshot, when) in repository.list_deleted(ResourceKind::Snapshot).await {
        if now - when >= options.grace
            && repository.locate(ResourceKind::Snapshot, snapshot).await.is_none()
        {
            stats.snapshots_reclaimed += 1;
        }
    }

    if !delta.is_empty() {
        repository.commit_delta(delta).await?;
    }

    info!(
        deleted = stats.packfiles_deleted,
        dropped = stats.blobs_dropped,
        orphans = stats.orphan_packfiles,
        "maintenance pass complete"
    );
    Ok(stats)
}
