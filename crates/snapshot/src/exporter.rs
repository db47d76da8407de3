//! The exporter seam: where restored data goes.

use crate::error::Result;
use crate::vfs::Xattr;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWrite;

/// A destination for restored trees.
#[async_trait]
pub trait Exporter: Send + Sync {
    fn root(&self) -> &str;

    async fn create_directory(&self, pathname: &str) -> Result<()>;

    /// Open one file for writing, by its repository-internal path.
    async fn create_file(&self, pathname: &str) -> Result<Box<dyn AsyncWrite + Send + Unpin>>;

    async fn create_symlink(&self, pathname: &str, target: &str) -> Result<()>;

    /// Apply mode and mtime after content is written.
    async fn set_metadata(&self, pathname: &str, mode: u32, mtime_ns: i64) -> Result<()>;

    /// Apply extended attributes after content is written.
    async fn set_xattrs(&self, pathname: &str, xattrs: &[Xattr]) -> Result<()>;
}

/// Filesystem exporter rooted at a local directory.
pub struct FsExporter {
    base: PathBuf,
    root: String,
}

impl FsExporter {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let base = root.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        Ok(Self {
            root: base.display().to_string(),
            base,
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
}

#[async_trait]
impl Exporter for FsExporter {
    fn root(&self) -> &str {
        &self.root
    }

    async fn create_directory(&self, pathname: &str) -> Result<()> {
        fs::create_dir_all(self.real_path(pathname)).await?;
        Ok(())
    }

    async fn create_file(&self, pathname: &str) -> Result<Box<dyn AsyncWrite + Send + Unpin>> {
        let path = self.real_path(pathname);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(Box::new(fs::File::create(path).await?))
    }

    #[cfg(unix)]
    async fn create_symlink(&self, pathname: &str, target: &str) -> Result<()> {
        let path = self.real_path(pathname);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::symlink(target, &path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                fs::remove_file(&path).await?;
                fs::symlink(target, &path).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(not(unix))]
    async fn create_symlink(&self, _pathname: &str, _target: &str) -> Result<()> {
        Ok(())
    }

    async fn set_metadata(&self, pathname: &str, mode: u32, mtime_ns: i64) -> Result<()> {
        let path = self.real_path(pathname);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).await?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        let mtime = filetime::FileTime::from_unix_time(
            mtime_ns.div_euclid(1_000_000_000),
            mtime_ns.rem_euclid(1_000_000_000) as u32,
        );
        let path_for_blocking = path.clone();
        tokio::task::spawn_blocking(move || {
            filetime::set_file_mtime(&path_for_blocking, mtime)
        })
        .await
        .map_err(|e| std::io::Error::other(format!("spawn_blocking failed: {e}")))??;
        Ok(())
    }

    #[cfg(unix)]
    async fn set_xattrs(&self, pathname: &str, xattrs: &[Xattr]) -> Result<()> {
        let path = self.real_path(pathname);
        for attr in xattrs {
            xattr::set(&path, &attr.name, &attr.value)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn set_xattrs(&self, _pathname: &str, _xattrs: &[Xattr]) -> Result<()> {
        Ok(())
    }
}
