//! Reachability walks over snapshot graphs.

use crate::btree::Tree;
use crate::error::Result;
use crate::header::SnapshotHeader;
use crate::vfs::Entry;
use silo_core::{Mac, Object, ResourceKind};
use silo_repository::Repository;
use std::collections::HashSet;

fn push(
    seen: &mut HashSet<(ResourceKind, Mac)>,
    out: &mut Vec<(ResourceKind, Mac)>,
    kind: ResourceKind,
    mac: Mac,
) -> bool {
    if seen.insert((kind, mac)) {
        out.push((kind, mac));
        true
    } else {
        false
    }
}

/// Every (kind, mac) reachable from one snapshot, deduplicated, in
/// discovery order: header, tree descriptors and nodes, entries, error
/// items, objects, chunks.
pub async fn reachable_blobs(
    repository: &Repository,
    snapshot: Mac,
) -> Result<Vec<(ResourceKind, Mac)>> {
    let mut seen: HashSet<(ResourceKind, Mac)> = HashSet::new();
    let mut out: Vec<(ResourceKind, Mac)> = Vec::new();

    push(&mut seen, &mut out, ResourceKind::Snapshot, snapshot);
    let header_bytes = repository
        .get_blob(ResourceKind::Snapshot, snapshot)
        .await?;
    let header = SnapshotHeader::from_bytes(&header_bytes)?;

    for root in [header.vfs, header.xattrs, header.errors] {
        push(&mut seen, &mut out, ResourceKind::VfsBtree, root);
        let tree = Tree::open(repository, root).await?;
        for node in tree.node_macs().await? {
            push(&mut seen, &mut out, ResourceKind::BtreeNode, node);
        }
    }

    let vfs = Tree::open(repository, header.vfs).await?;
    for (_, entry_mac) in vfs.entries().await? {
        push(&mut seen, &mut out, ResourceKind::VfsEntry, entry_mac);
        let entry_bytes = repository
            .get_blob(ResourceKind::VfsEntry, entry_mac)
            .await?;
        let entry = Entry::from_bytes(&entry_bytes)?;

        if let Some(object_mac) = entry.object {
            if push(&mut seen, &mut out, ResourceKind::Object, object_mac) {
                let object_bytes = repository
                    .get_blob(ResourceKind::Object, object_mac)
                    .await?;
                let object = Object::from_bytes(&object_bytes)?;
                for chunk in &object.chunks {
                    push(&mut seen, &mut out, ResourceKind::Chunk, chunk.mac);
                }
            }
        }
    }

    let xattrs = Tree::open(repository, header.xattrs).await?;
    for (_, xattr_mac) in xattrs.entries().await? {
        push(&mut seen, &mut out, ResourceKind::VfsEntry, xattr_mac);
    }

    let errors = Tree::open(repository, header.errors).await?;
    for (_, error_mac) in errors.entries().await? {
        push(&mut seen, &mut out, ResourceKind::Error, error_mac);
    }

    Ok(out)
}
