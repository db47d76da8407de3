//! Restore a snapshot subtree through an exporter.

use crate::error::Result;
use crate::exporter::Exporter;
use crate::reader::Snapshot;
use crate::vfs::EntryKind;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};

#[derive(Debug, Default)]
pub struct RestoreStats {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub bytes: u64,
    pub warnings: u64,
}

/// Materialize every entry under `prefix` into the exporter. Mode and
/// mtime are applied after content; directories get their metadata last so
/// file writes cannot bump parent mtimes afterwards.
#[instrument(skip(snapshot, exporter), fields(prefix))]
pub async fn restore(
    snapshot: &Snapshot,
    prefix: &str,
    exporter: &dyn Exporter,
) -> Result<RestoreStats> {
    let mut stats = RestoreStats::default();
    let entries = snapshot.list(prefix).await?;

    let mut directories = Vec::new();
    for listed in &entries {
        match listed.kind {
            EntryKind::Directory => {
                exporter.create_directory(&listed.pathname).await?;
                apply_xattrs(snapshot, exporter, &listed.pathname, &mut stats).await?;
                directories.push((listed.pathname.clone(), listed.mode, listed.mtime_ns));
                stats.directories += 1;
            }
            EntryKind::File => {
                let mut writer = exporter.create_file(&listed.pathname).await?;
                let mut stream = snapshot.reader(&listed.pathname).await?;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    writer.write_all(&chunk).await?;
                    stats.bytes += chunk.len() as u64;
                }
                writer.shutdown().await?;
                exporter
                    .set_metadata(&listed.pathname, listed.mode, listed.mtime_ns)
                    .await?;
                apply_xattrs(snapshot, exporter, &listed.pathname, &mut stats).await?;
                stats.files += 1;
            }
            EntryKind::Symlink => {
                let vfs = snapshot.filesystem().await?;
                let entry = vfs.entry(&listed.pathname).await?;
                match entry.link_target {
                    Some(target) => {
                        exporter.create_symlink(&listed.pathname, &target).await?;
                        stats.symlinks += 1;
                    }
                    None => {
                        warn!("symlink {} has no target, skipped", listed.pathname);
                        stats.warnings += 1;
                    }
                }
            }
        }
    }

    for (pathname, mode, mtime_ns) in directories.into_iter().rev() {
        exporter.set_metadata(&pathname, mode, mtime_ns).await?;
    }
    Ok(stats)
}

/// Restore a path's extended attributes. A destination that refuses them
/// (filesystem without xattr support) degrades to a warning, not a failure.
async fn apply_xattrs(
    snapshot: &Snapshot,
    exporter: &dyn Exporter,
    pathname: &str,
    stats: &mut RestoreStats,
) -> Result<()> {
    let xattrs = snapshot.xattrs(pathname).await?;
    if xattrs.is_empty() {
        return Ok(());
    }
    if let Err(e) = exporter.set_xattrs(pathname, &xattrs).await {
        warn!("xattrs on {pathname} not restored: {e}");
        stats.warnings += 1;
    }
    Ok(())
}
