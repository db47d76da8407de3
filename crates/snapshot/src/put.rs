//! Dedup-aware blob emission.

use crate::error::Result;
use bytes::Bytes;
use silo_core::{Mac, ResourceKind};
use silo_repository::{Packer, Repository};

/// Send a blob to the packer unless it is already durable in the repository
/// or already claimed by another producer in this transaction. Returns true
/// when the blob was actually enqueued.
pub async fn put_blob_if_new(
    repository: &Repository,
    packer: &Packer,
    kind: ResourceKind,
    mac: Mac,
    data: Bytes,
) -> Result<bool> {
    if repository.blob_exists(kind, mac).await {
        return Ok(false);
    }
    if packer.insert_if_not_present(kind, mac) {
        return Ok(false);
    }
    packer.put(kind, mac, data).await?;
    Ok(true)
}
