//! The packer pipeline: many producers, a small worker pool, one delta.
//!
//! Producers deduplicate in-flight blobs through `insert_if_not_present`
//! and enqueue payloads onto a bounded channel; workers drain it, each
//! owning a packfile-in-progress that is finalized and uploaded when the
//! body crosses the configured cap. Locate events for every finalized blob
//! accumulate in the transaction's state delta, which the caller commits
//! (or, on cancellation, drops) after `wait` returns.

use crate::error::{RepositoryError, Result};
use crate::packfile::PackWriter;
use crate::repository::Repository;
use crate::state::{Location, StateDelta};
use bytes::Bytes;
use silo_core::{Mac, ResourceKind};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::debug;

pub struct PackerMsg {
    pub kind: ResourceKind,
    pub mac: Mac,
    pub data: Bytes,
}

pub struct Packer {
    tx: Option<mpsc::Sender<PackerMsg>>,
    workers: JoinSet<Result<()>>,
    inflight: Arc<StdMutex<HashSet<(ResourceKind, Mac)>>>,
    delta: Arc<Mutex<StateDelta>>,
}

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Packer {
    pub(crate) fn spawn(repository: Arc<Repository>, delta: StateDelta) -> Self {
        let workers_n = worker_count();
        let (tx, rx) = mpsc::channel::<PackerMsg>(workers_n * 2 + 1);
        let rx = Arc::new(Mutex::new(rx));
        let delta = Arc::new(Mutex::new(delta));

        let mut workers = JoinSet::new();
        for _ in 0..workers_n {
            workers.spawn(Self::worker(
                Arc::clone(&repository),
                Arc::clone(&rx),
                Arc::clone(&delta),
            ));
        }

        Self {
            tx: Some(tx),
            workers,
            inflight: Arc::new(StdMutex::new(HashSet::new())),
            delta,
        }
    }

    /// Claim a (kind, mac) for this transaction. Returns true when some
    /// producer already claimed it, in which case the caller must not `put`
    /// it again.
    pub fn insert_if_not_present(&self, kind: ResourceKind, mac: Mac) -> bool {
        !self
            .inflight
            .lock()
            .expect("packer in-flight set poisoned")
            .insert((kind, mac))
    }

    pub fn exists(&self, kind: ResourceKind, mac: Mac) -> bool {
        self.inflight
            .lock()
            .expect("packer in-flight set poisoned")
            .contains(&(kind, mac))
    }

    /// Enqueue a blob payload. Blocks when the channel is full; fails once
    /// the packer has shut down.
    pub async fn put(&self, kind: ResourceKind, mac: Mac, data: Bytes) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(RepositoryError::Cancelled)?;
        tx.send(PackerMsg { kind, mac, data })
            .await
            .map_err(|_| RepositoryError::Cancelled)
    }

    /// Close the channel, drain the workers and finalize the in-progress
    /// packfiles. Returns the accumulated delta; committing it (or not) is
    /// the caller's transaction decision.
    pub async fn wait(mut self) -> Result<StateDelta> {
        drop(self.tx.take());

        let mut first_error = None;
        while let Some(joined) = self.workers.join_next().await {
            let result = joined
                .map_err(|e| RepositoryError::Internal(format!("packer worker panicked: {e}")))
                .and_then(|r| r);
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let delta = Arc::try_unwrap(self.delta)
            .map_err(|_| RepositoryError::Internal("packer delta still shared".to_string()))?;
        Ok(delta.into_inner())
    }

    async fn worker(
        repository: Arc<Repository>,
        rx: Arc<Mutex<mpsc::Receiver<PackerMsg>>>,
        delta: Arc<Mutex<StateDelta>>,
    ) -> Result<()> {
        let max_size = repository.config().packfile.max_size;
        let mut writer = PackWriter::new();

        loop {
            let msg = { rx.lock().await.recv().await };
            let Some(msg) = msg else { break };

            let envelope = repository.codec().encode(msg.kind, &msg.data).await?;

            // Never aggregate onto a body an incoming blob would push past
            // the cap; an over-cap blob lands alone in its own packfile.
            if !writer.is_empty() && writer.size() + envelope.len() as u64 > max_size {
                Self::flush(&repository, &delta, std::mem::take(&mut writer)).await?;
            }
            writer.add_blob(msg.kind, msg.mac, &envelope);
            if writer.size() >= max_size {
                Self::flush(&repository, &delta, std::mem::take(&mut writer)).await?;
            }
        }

        if !writer.is_empty() {
            Self::flush(&repository, &delta, writer).await?;
        }
        Ok(())
    }

    async fn flush(
        repository: &Repository,
        delta: &Mutex<StateDelta>,
        writer: PackWriter,
    ) -> Result<()> {
        let now = repository.now();
        let count = writer.count();
        let pack = writer.finalize(repository.codec(), now).await?;
        repository.put_packfile(&pack).await?;
        debug!(
            packfile = %pack.mac.short(),
            blobs = count,
            bytes = pack.bytes.len(),
            "finalized packfile"
        );

        let mut delta = delta.lock().await;
        for entry in &pack.entries {
            delta.push_locate(
                entry.kind,
                entry.mac,
                Location {
                    packfile: pack.mac,
                    offset: entry.offset,
                    length: entry.length,
                },
                now,
            )?;
        }
        Ok(())
    }
}
