//! Durable storage for uploaded source files.

use crate::resilience::{Transient, bounded};
use crate::tenant::TenantName;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::error::Elapsed;
use uuid::Uuid;

/// Errors raised while persisting uploaded bytes.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Supplied file name had no usable base name.
    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),
    /// Filesystem operation failed.
    #[error("Failed to write {path}: {source}")]
    Io {
        /// Target path of the failed write.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Write did not finish within the store deadline.
    #[error("File write timed out")]
    Timeout,
}

impl From<Elapsed> for StorageError {
    fn from(_: Elapsed) -> Self {
        Self::Timeout
    }
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Handle to a persisted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Location of the persisted bytes, recorded alongside the document.
    pub path: String,
}

/// Destination for uploaded source files.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Durably persist `bytes` under the tenant, keyed by the original file name.
    async fn persist(
        &self,
        tenant: &TenantName,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError>;
}

/// Local-disk file store rooted at a configured directory.
pub struct LocalFileStore {
    root: PathBuf,
    timeout: Duration,
}

impl LocalFileStore {
    /// Store files below `root`, bounding each write by `timeout`.
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
        }
    }

    fn target_path(&self, tenant: &TenantName, file_name: &str) -> Result<PathBuf, StorageError> {
        let base = safe_file_name(file_name)
            .ok_or_else(|| StorageError::InvalidFileName(file_name.to_string()))?;
        Ok(self.root.join(tenant.key()).join(base))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn persist(
        &self,
        tenant: &TenantName,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError> {
        let path = self.target_path(tenant, file_name)?;
        bounded(self.timeout, write_durably(&path, bytes)).await?;
        tracing::debug!(
            tenant = %tenant,
            path = %path.display(),
            bytes = bytes.len(),
            "Upload persisted"
        );
        Ok(StoredFile {
            path: path.to_string_lossy().into_owned(),
        })
    }
}

/// Write `bytes` beside `path` under a unique name, sync, then rename over `path`.
///
/// Concurrent writers of the same path each leave a complete file; the last rename wins.
async fn write_durably(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let io_error = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await.map_err(io_error)?;

    let staging = staging_path(path);
    let written = async {
        let mut file = tokio::fs::File::create(&staging).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&staging, path).await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    if let Err(source) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&staging).await
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %staging.display(),
                error = %cleanup,
                "Failed to remove staging file"
            );
        }
        return Err(io_error(source));
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.part", Uuid::new_v4().simple()))
}

/// Reduce a client-supplied file name to its final component, rejecting traversal tricks.
pub fn safe_file_name(raw: &str) -> Option<&str> {
    let normalized = raw.rsplit(['/', '\\']).next()?.trim();
    match normalized {
        "" | "." | ".." => None,
        name => Some(name),
    }
}
