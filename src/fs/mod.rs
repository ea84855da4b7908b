//! Filesystem access for the capture pipeline.
//! Every path the pipeline writes is relative to a named [BaseDirectory]; only images handed
//! back by a screenshot provider are read through absolute paths.

pub mod path;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::utils::dir;

use self::path::ensure_relative;

/// Named root under which relative paths are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseDirectory {
    Document,
    Picture,
    AppData,
    AppLocalData,
    Custom(PathBuf),
}

impl BaseDirectory {
    pub fn resolve(&self) -> Result<PathBuf> {
        match self {
            BaseDirectory::Document => dir::documents_dir(),
            BaseDirectory::Picture => dir::pictures_dir(),
            BaseDirectory::AppData => dir::data_dir(),
            BaseDirectory::AppLocalData => dir::local_data_dir(),
            BaseDirectory::Custom(path) => Ok(path.clone()),
        }
    }
}

/// Intended to serve as the contract between the capture pipeline and the storage it persists
/// into.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn path_exists(&self, path: &Path, base: &BaseDirectory) -> Result<bool>;

    /// Creates the directory and any missing parents. Succeeds if it already exists.
    async fn create_directory(&self, path: &Path, base: &BaseDirectory) -> Result<()>;

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>>;

    /// Writes a new file. Must fail rather than overwrite an existing one.
    async fn write_bytes(&self, path: &Path, bytes: &[u8], base: &BaseDirectory) -> Result<()>;
}

/// [FileSystem] over the local disk.
#[derive(Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }

    fn full_path(path: &Path, base: &BaseDirectory) -> Result<PathBuf> {
        ensure_relative(path).map_err(|reason| anyhow!("Invalid path {path:?}: {reason}"))?;
        Ok(base.resolve()?.join(path))
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn path_exists(&self, path: &Path, base: &BaseDirectory) -> Result<bool> {
        let full = Self::full_path(path, base)?;
        Ok(tokio::fs::try_exists(full).await?)
    }

    async fn create_directory(&self, path: &Path, base: &BaseDirectory) -> Result<()> {
        let full = Self::full_path(path, base)?;
        debug!("Creating directory {full:?}");
        tokio::fs::create_dir_all(full).await?;
        Ok(())
    }

    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write_bytes(&self, path: &Path, bytes: &[u8], base: &BaseDirectory) -> Result<()> {
        let full = Self::full_path(path, base)?;
        let mut file = tokio::fs::File::options()
            .write(true)
            .create_new(true)
            .open(&full)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        debug!("Wrote {} bytes to {full:?}", bytes.len());
        Ok(())
    }
}
