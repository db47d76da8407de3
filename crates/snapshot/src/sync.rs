//! Snapshot replication between repositories.
//!
//! Idempotent at snapshot granularity: a snapshot already present in the
//! destination is skipped whole; a partially transferred one (crash before
//! the delta commit) re-transfers and converges, since every blob put is
//! dedup-checked.

use crate::error::Result;
use crate::walk::reachable_blobs;
use crate::put::put_blob_if_new;
use silo_core::ResourceKind;
use silo_repository::{retry_read, Repository};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Default)]
pub struct SyncStats {
    pub snapshots: u64,
    pub blobs: u64,
}

/// Replicate every snapshot present in `source` and absent in
/// `destination`.
#[instrument(skip_all, fields(from = source.location(), to = destination.location()))]
pub async fn sync(
    source: &Arc<Repository>,
    destination: &Arc<Repository>,
) -> Result<SyncStats> {
    let mut stats = SyncStats::default();

    for snapshot in source.list_snapshots().await {
        if destination
            .blob_exists(ResourceKind::Snapshot, snapshot)
            .await
        {
            continue;
        }

        let blobs = reachable_blobs(source, snapshot).await?;
        let packer = destination.start_packer();
        for (kind, mac) in blobs {
            if destination.blob_exists(kind, mac).await {
                continue;
            }
            let data = retry_read("sync blob read", || source.get_blob(kind, mac)).await?;
            if put_blob_if_new(destination, &packer, kind, mac, data).await? {
                stats.blobs += 1;
            }
        }
        let delta = packer.wait().await?;
        destination.commit_delta(delta).await?;
        stats.snapshots += 1;
        info!("synchronized snapshot {}", snapshot.short());
    }

    Ok(stats)
}
