//! The snapshot builder: scan, chunk, aggregate, commit.
//!
//! Three concurrent stages feed one packer transaction. The scanner drains
//! the importer and fans regular files out to a bounded chunker pool; once
//! the pool drains, the directory finalizer walks paths in reverse order so
//! every directory sees its children's summaries before its own entry blob
//! is emitted. The snapshot header and the state delta are only written
//! when the whole pipeline completed without cancellation: a cancelled run
//! finalizes in-flight packfiles (no orphan chunks inside half-written
//! packs) but leaves the work unreferenced for maintenance to reclaim.

use crate::btree::build_tree;
use crate::chunker::chunkify;
use crate::error::{Result, SnapshotError};
use crate::header::{ImporterInfo, SnapshotHeader};
use crate::importer::{Importer, ScanRecord, ScanResult};
use crate::put::put_blob_if_new;
use crate::vfs::{parent_path, Entry, EntryKind, ErrorItem, FileStat, Summary, XattrRecord};
use crate::vfs_cache::VfsCache;
use bytes::Bytes;
use globset::{Glob, GlobSet, GlobSetBuilder};
use rand::RngCore;
use silo_core::{Mac, ResourceKind};
use silo_repository::{CacheManager, Packer, Repository};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

pub struct BackupOptions {
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub job: Option<String>,
    pub excludes: Vec<String>,
    pub concurrency: Option<usize>,
    pub cancel: CancellationToken,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            name: None,
            tags: Vec::new(),
            job: None,
            excludes: Vec::new(),
            concurrency: None,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug)]
pub struct BackupOutcome {
    pub snapshot: Mac,
    pub summary: Summary,
    pub warnings: u64,
    pub duration: time::Duration,
}

/// What the chunker pool hands the directory finalizer for each path.
#[derive(Clone)]
struct Built {
    mac: Mac,
    kind: EntryKind,
    size: u64,
    summary: Option<Summary>,
}

fn compile_excludes(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SnapshotError::BadGlob(format!("{pattern}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SnapshotError::BadGlob(e.to_string()))
}

fn default_concurrency() -> usize {
    2 * std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[instrument(skip_all, fields(root = importer.root()))]
pub async fn backup(
    repository: Arc<Repository>,
    cache: &CacheManager,
    importer: Arc<dyn Importer>,
    options: BackupOptions,
) -> Result<BackupOutcome> {
    let excludes = compile_excludes(&options.excludes)?;
    let concurrency = options.concurrency.unwrap_or_else(default_concurrency);

    let origin_key = format!("{}:{}", importer.origin(), importer.root());
    let vfs_cache_path = cache
        .vfs_cache_path(repository.config().repository_id, &origin_key)
        .await?;
    let vfs_cache = Arc::new(StdMutex::new(VfsCache::load(&vfs_cache_path).await));

    let started_at = OffsetDateTime::now_utc();
    let clock = std::time::Instant::now();

    let packer = Arc::new(repository.start_packer());
    let scanned: Arc<StdMutex<BTreeMap<String, ScanRecord>>> =
        Arc::new(StdMutex::new(BTreeMap::new()));
    let errors: Arc<StdMutex<BTreeMap<String, String>>> = Arc::new(StdMutex::new(BTreeMap::new()));
    let built: Arc<StdMutex<BTreeMap<String, Built>>> = Arc::new(StdMutex::new(BTreeMap::new()));
    let xattr_index: Arc<StdMutex<BTreeMap<String, Mac>>> =
        Arc::new(StdMutex::new(BTreeMap::new()));

    // Stage 1+2: drain the scanner, spawning bounded chunker tasks for
    // everything that is not a directory.
    let mut root_error: Option<String> = None;
    {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut scan_rx = importer.scan().await?;

        while let Some(result) = scan_rx.recv().await {
            if options.cancel.is_cancelled() {
                break;
            }
            match result {
                ScanResult::Error(e) => {
                    if e.pathname == "/" {
                        root_error = Some(e.message);
                        break;
                    }
                    warn!("scan error at {}: {}", e.pathname, e.message);
                    errors.lock().unwrap().insert(e.pathname, e.message);
                }
                ScanResult::Record(record) => {
                    if record.pathname != "/" && excludes.is_match(&record.pathname) {
                        continue;
                    }
                    scanned
                        .lock()
                        .unwrap()
                        .insert(record.pathname.clone(), record.clone());
                    if record.kind == EntryKind::Directory {
                        continue;
                    }

                    let permit = Arc::clone(&semaphore)
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");
                    let repository = Arc::clone(&repository);
                    let packer = Arc::clone(&packer);
                    let importer = Arc::clone(&importer);
                    let vfs_cache = Arc::clone(&vfs_cache);
                    let errors = Arc::clone(&errors);
                    let built = Arc::clone(&built);
                    let xattr_index = Arc::clone(&xattr_index);
                    workers.spawn(async move {
                        let _permit = permit;
                        if let Err(e) = process_file(
                            &repository,
                            &packer,
                            &*importer,
                            &vfs_cache,
                            &built,
                            &xattr_index,
                            &record,
                        )
                        .await
                        {
                            warn!("backup of {} failed: {e}", record.pathname);
                            errors
                                .lock()
                                .unwrap()
                                .insert(record.pathname.clone(), e.to_string());
                        }
                    });
                }
            }
        }
        while workers.join_next().await.is_some() {}
    }

    // Importer-root failures and cancellation abort the snapshot, but the
    // packer still finalizes whatever it already accepted.
    if let Some(message) = root_error {
        let packer = take_packer(packer)?;
        let _ = packer.wait().await;
        return Err(SnapshotError::RootFailed(message));
    }
    if options.cancel.is_cancelled() {
        let packer = take_packer(packer)?;
        let _ = packer.wait().await?;
        return Err(SnapshotError::Cancelled);
    }

    // Stage 3: directories, deepest paths first.
    let scanned = std::mem::take(&mut *scanned.lock().unwrap());
    {
        let mut children_of: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for path in scanned.keys() {
            if let Some(parent) = parent_path(path) {
                children_of.entry(parent).or_default().push(path.clone());
            }
        }

        let error_paths: Vec<String> = errors.lock().unwrap().keys().cloned().collect();
        for (path, record) in scanned.iter().rev() {
            if record.kind != EntryKind::Directory {
                continue;
            }

            let mut summary = Summary::default();
            for child in children_of.get(path).into_iter().flatten() {
                let child_built = built.lock().unwrap().get(child).cloned();
                let Some(child_built) = child_built else {
                    continue;
                };
                match child_built.kind {
                    EntryKind::Directory => {
                        summary.directories += 1;
                        if let Some(child_summary) = &child_built.summary {
                            summary.add_child_summary(child_summary);
                        }
                    }
                    kind => summary.add_entry(kind, child_built.size),
                }
            }
            // Only direct-child errors; deeper ones arrive through the
            // child directory summaries, like every other aggregate.
            summary.errors += error_paths
                .iter()
                .filter(|p| parent_path(p).as_deref() == Some(path.as_str()))
                .count() as u64;

            if !record.xattrs.is_empty() {
                emit_xattrs(&repository, &packer, record, &xattr_index).await?;
            }

            let entry = Entry {
                pathname: path.clone(),
                kind: EntryKind::Directory,
                stat: FileStat {
                    size: 0,
                    mode: record.mode,
                    mtime_ns: record.mtime_ns,
                },
                object: None,
                link_target: None,
                summary: Some(summary.clone()),
            };
            let bytes = entry.to_bytes()?;
            let mac = repository.compute_mac(&bytes);
            put_blob_if_new(
                &repository,
                &packer,
                ResourceKind::VfsEntry,
                mac,
                Bytes::from(bytes),
            )
            .await?;
            built.lock().unwrap().insert(
                path.clone(),
                Built {
                    mac,
                    kind: EntryKind::Directory,
                    size: 0,
                    summary: Some(summary),
                },
            );
        }
    }

    let built = std::mem::take(&mut *built.lock().unwrap());
    let root_summary = built
        .get("/")
        .and_then(|b| b.summary.clone())
        .ok_or_else(|| SnapshotError::RootFailed("scan produced no root entry".to_string()))?;

    // Error blobs and the three trees.
    let errors = std::mem::take(&mut *errors.lock().unwrap());
    let warnings = errors.len() as u64;
    let mut error_index = BTreeMap::new();
    for (path, message) in &errors {
        let item = ErrorItem {
            pathname: path.clone(),
            message: message.clone(),
        };
        let bytes = item.to_bytes()?;
        let mac = repository.compute_mac(&bytes);
        put_blob_if_new(
            &repository,
            &packer,
            ResourceKind::Error,
            mac,
            Bytes::from(bytes),
        )
        .await?;
        error_index.insert(path.clone(), mac);
    }

    let vfs_index: BTreeMap<String, Mac> =
        built.iter().map(|(path, b)| (path.clone(), b.mac)).collect();
    let xattr_index = std::mem::take(&mut *xattr_index.lock().unwrap());
    let vfs_root = build_tree(&repository, &packer, &vfs_index).await?;
    let xattrs_root = build_tree(&repository, &packer, &xattr_index).await?;
    let errors_root = build_tree(&repository, &packer, &error_index).await?;

    // The header blob, keyed by the snapshot's random identifier.
    let mut identifier_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut identifier_bytes);
    let identifier = Mac::from_bytes(identifier_bytes);

    let mut header = SnapshotHeader::new(identifier, started_at);
    header.name = options
        .name
        .clone()
        .unwrap_or_else(|| format!("{} @ {}", importer.root(), importer.origin()));
    header.tags = options.tags.clone();
    header.job = options.job.clone();
    header.importer = ImporterInfo {
        kind: importer.kind().to_string(),
        origin: importer.origin().to_string(),
        directory: importer.root().to_string(),
    };
    header.vfs = vfs_root;
    header.xattrs = xattrs_root;
    header.errors = errors_root;
    header.summary = root_summary.clone();
    header.duration = time::Duration::try_from(clock.elapsed())
        .unwrap_or(time::Duration::ZERO);

    let header_bytes = header.to_bytes()?;
    packer
        .put(ResourceKind::Snapshot, identifier, Bytes::from(header_bytes))
        .await?;

    // Drain the packer; committing the delta is what makes the snapshot
    // observable.
    let packer = take_packer(packer)?;
    let delta = packer.wait().await?;
    if options.cancel.is_cancelled() {
        return Err(SnapshotError::Cancelled);
    }
    repository.commit_delta(delta).await?;

    let cache_snapshot = {
        let guard = vfs_cache.lock().unwrap();
        rmp_serde::to_vec_named(&*guard)?
    };
    let _ = tokio::fs::write(&vfs_cache_path, cache_snapshot).await;

    Ok(BackupOutcome {
        snapshot: identifier,
        summary: root_summary,
        warnings,
        duration: header.duration,
    })
}

fn take_packer(packer: Arc<Packer>) -> Result<Packer> {
    Arc::try_unwrap(packer).map_err(|_| {
        SnapshotError::Repository(silo_repository::RepositoryError::Internal(
            "packer still shared after pipeline drain".to_string(),
        ))
    })
}

/// Store a path's extended attributes as a blob and index it for the
/// snapshot's xattr tree.
async fn emit_xattrs(
    repository: &Repository,
    packer: &Packer,
    record: &ScanRecord,
    xattr_index: &StdMutex<BTreeMap<String, Mac>>,
) -> Result<()> {
    let item = XattrRecord {
        pathname: record.pathname.clone(),
        xattrs: record.xattrs.clone(),
    };
    let bytes = item.to_bytes()?;
    let mac = repository.compute_mac(&bytes);
    put_blob_if_new(
        repository,
        packer,
        ResourceKind::VfsEntry,
        mac,
        Bytes::from(bytes),
    )
    .await?;
    xattr_index
        .lock()
        .unwrap()
        .insert(record.pathname.clone(), mac);
    Ok(())
}

async fn process_file(
    repository: &Repository,
    packer: &Packer,
    importer: &dyn Importer,
    vfs_cache: &StdMutex<VfsCache>,
    built: &StdMutex<BTreeMap<String, Built>>,
    xattr_index: &StdMutex<BTreeMap<String, Mac>>,
    record: &ScanRecord,
) -> Result<()> {
    let mut object_mac = None;

    if record.kind == EntryKind::File {
        let cached = vfs_cache
            .lock()
            .unwrap()
            .lookup(&record.pathname, record.mtime_ns, record.size);

        let reusable = match cached {
            Some(mac) => repository.blob_exists(ResourceKind::Object, mac).await,
            None => false,
        };

        if reusable {
            object_mac = cached;
        } else {
            let reader = importer.open(&record.pathname).await?;
            let object = chunkify(repository, packer, reader, &record.pathname, record.size).await?;
            let bytes = object.to_bytes()?;
            put_blob_if_new(
                repository,
                packer,
                ResourceKind::Object,
                object.mac,
                Bytes::from(bytes),
            )
            .await?;
            vfs_cache.lock().unwrap().record(
                record.pathname.clone(),
                record.mtime_ns,
                record.size,
                object.mac,
            );
            object_mac = Some(object.mac);
        }
    }

    let entry = Entry {
        pathname: record.pathname.clone(),
        kind: record.kind,
        stat: FileStat {
            size: record.size,
            mode: record.mode,
            mtime_ns: record.mtime_ns,
        },
        object: object_mac,
        link_target: record.link_target.clone(),
        summary: None,
    };
    let bytes = entry.to_bytes()?;
    let mac = repository.compute_mac(&bytes);
    put_blob_if_new(repository, packer, ResourceKind::VfsEntry, mac, Bytes::from(bytes)).await?;

    if !record.xattrs.is_empty() {
        emit_xattrs(repository, packer, record, xattr_index).await?;
    }

    built.lock().unwrap().insert(
        record.pathname.clone(),
        Built {
            mac,
            kind: record.kind,
            size: record.size,
            summary: None,
        },
    );
    Ok(())
}
