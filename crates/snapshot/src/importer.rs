//! The importer seam: where snapshot sources come from.

use crate::error::{Result, SnapshotError};
use crate::vfs::{EntryKind, Xattr};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

/// One path yielded by a scan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Repository-internal path, rooted at "/".
    pub pathname: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub mtime_ns: i64,
    pub link_target: Option<String>,
    pub xattrs: Vec<Xattr>,
}

#[derive(Clone, Debug)]
pub struct ScanError {
    pub pathname: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub enum ScanResult {
    Record(ScanRecord),
    Error(ScanError),
}

/// A source of paths and file contents for backup.
#[async_trait]
pub trait Importer: Send + Sync {
    /// Backend kind, e.g. "fs".
    fn kind(&self) -> &str;

    /// Where the data comes from, e.g. a hostname.
    fn origin(&self) -> &str;

    /// The scanned root as the user named it.
    fn root(&self) -> &str;

    /// Stream scan results. The channel ends when the walk completes.
    async fn scan(&self) -> Result<mpsc::Receiver<ScanResult>>;

    /// Open one file for reading, by its repository-internal path.
    async fn open(&self, pathname: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Filesystem importer over a local directory tree.
#[derive(Debug)]
pub struct FsImporter {
    base: PathBuf,
    root: String,
    origin: String,
}

impl FsImporter {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let base = root.as_ref().to_path_buf();
        let canonical = fs::canonicalize(&base)
            .await
            .map_err(|e| SnapshotError::RootFailed(format!("{}: {e}", base.display())))?;
        let origin = hostname();
        Ok(Self {
            base: canonical,
            root: base.display().to_string(),
            origin,
        })
    }

    fn real_path(&self, pathname: &str) -> PathBuf {
        let relative = pathname.trim_start_matches('/');
        if relative.is_empty() {
            self.base.clone()
        } else {
            self.base.join(relative)
        }
    }

    fn internal_path(base: &Path, path: &Path) -> String {
        match path.strip_prefix(base) {
            Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
            Ok(rel) => format!("/{}", rel.to_string_lossy().replace('\\', "/")),
            Err(_) => "/".to_string(),
        }
    }

    async fn record_for(path: &Path, internal: String) -> std::io::Result<ScanRecord> {
        let metadata = fs::symlink_metadata(path).await?;
        let file_type = metadata.file_type();

        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };

        let link_target = if kind == EntryKind::Symlink {
            Some(
                fs::read_link(path)
                    .await?
                    .to_string_lossy()
                    .into_owned(),
            )
        } else {
            None
        };

        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        let xattrs = if kind == EntryKind::Symlink {
            Vec::new()
        } else {
            read_xattrs(path)
        };

        Ok(ScanRecord {
            pathname: internal,
            kind,
            size: if kind == EntryKind::File {
                metadata.len()
            } else {
                0
            },
            mode: unix_mode(&metadata),
            mtime_ns,
            link_target,
            xattrs,
        })
    }
}

/// Extended attributes of a path. Unreadable names or values are skipped;
/// a filesystem without xattr support yields none.
#[cfg(unix)]
fn read_xattrs(path: &Path) -> Vec<Xattr> {
    let Ok(names) = xattr::list(path) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for name in names {
        let Some(name) = name.to_str().map(str::to_string) else {
            continue;
        };
        if let Ok(Some(value)) = xattr::get(path, &name) {
            out.push(Xattr { name, value });
        }
    }
    out
}

#[cfg(not(unix))]
fn read_xattrs(_path: &Path) -> Vec<Xattr> {
    Vec::new()
}

#[cfg(unix)]
fn unix_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn unix_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[async_trait]
impl Importer for FsImporter {
    fn kind(&self) -> &str {
        "fs"
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    fn root(&self) -> &str {
        &self.root
    }

    async fn scan(&self) -> Result<mpsc::Receiver<ScanResult>> {
        let (tx, rx) = mpsc::channel(1000);
        let base = self.base.clone();

        tokio::spawn(async move {
            let mut stack = vec![base.clone()];
            while let Some(dir) = stack.pop() {
                let internal_dir = Self::internal_path(&base, &dir);
                match Self::record_for(&dir, internal_dir.clone()).await {
                    Ok(record) => {
                        if tx.send(ScanResult::Record(record)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(ScanResult::Error(ScanError {
                                pathname: internal_dir,
                                message: e.to_string(),
                            }))
                            .await;
                        continue;
                    }
                }

                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        let _ = tx
                            .send(ScanResult::Error(ScanError {
                                pathname: Self::internal_path(&base, &dir),
                                message: e.to_string(),
                            }))
                            .await;
                        continue;
                    }
                };

                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => {
                            let path = entry.path();
                            let internal = Self::internal_path(&base, &path);
                            let file_type = match entry.file_type().await {
                                Ok(t) => t,
                                Err(e) => {
                                    let _ = tx
                                        .send(ScanResult::Error(ScanError {
                                            pathname: internal,
                                            message: e.to_string(),
                                        }))
                                        .await;
                                    continue;
                                }
                            };
                            if file_type.is_dir() {
                                stack.push(path);
                                continue;
                            }
                            match Self::record_for(&path, internal.clone()).await {
                                Ok(record) => {
                                    if tx.send(ScanResult::Record(record)).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    let _ = tx
                                        .send(ScanResult::Error(ScanError {
                                            pathname: internal,
                                            message: e.to_string(),
                                        }))
                                        .await;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx
                                .send(ScanResult::Error(ScanError {
                                    pathname: Self::internal_path(&base, &dir),
                                    message: e.to_string(),
                                }))
                                .await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn open(&self, pathname: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = fs::File::open(self.real_path(pathname)).await?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    async fn scan_all(importer: &FsImporter) -> BTreeMap<String, ScanRecord> {
        let mut rx = importer.scan().await.unwrap();
        let mut records = BTreeMap::new();
        while let Some(result) = rx.recv().await {
            if let ScanResult::Record(record) = result {
                records.insert(record.pathname.clone(), record);
            }
        }
        records
    }

    #[tokio::test]
    async fn scans_a_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/c.txt"), b"world").unwrap();

        let importer = FsImporter::new(dir.path()).await.unwrap();
        let records = scan_all(&importer).await;

        assert_eq!(records["/"].kind, EntryKind::Directory);
        assert_eq!(records["/a.txt"].kind, EntryKind::File);
        assert_eq!(records["/a.txt"].size, 5);
        assert_eq!(records["/b"].kind, EntryKind::Directory);
        assert_eq!(records["/b/c.txt"].size, 5);

        use tokio::io::AsyncReadExt;
        let mut reader = importer.open("/b/c.txt").await.unwrap();
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"world");
    }

    #[tokio::test]
    async fn missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            FsImporter::new(&missing).await.unwrap_err(),
            SnapshotError::RootFailed(_)
        ));
    }
}
