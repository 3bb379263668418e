//! Filesystem blob store
//!
//! Writes land in `<root>/.partial/` and are renamed into place only after
//! the whole stream has been written and synced, so a committed key always
//! holds complete bytes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::{BlobReader, BlobStore, ByteStream};
use crate::core::error::{AppError, Result};

const PARTIAL_DIR: &str = ".partial";

pub struct LocalBlobStore {
    root: PathBuf,
    partial_dir: PathBuf,
}

impl LocalBlobStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Leftover partial writes from a previous process are removed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let partial_dir = root.join(PARTIAL_DIR);

        fs::create_dir_all(&partial_dir).await.map_err(|e| {
            AppError::Internal(format!(
                "Failed to create blob directory '{}': {}",
                partial_dir.display(),
                e
            ))
        })?;

        let store = Self { root, partial_dir };
        let purged = store.purge_partials().await?;
        if purged > 0 {
            info!("Removed {} stale partial blob(s)", purged);
        }

        info!("Local blob store initialized at {}", store.root.display());
        Ok(store)
    }

    /// Map a storage key onto a path below the root, refusing anything that could escape it
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let is_safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
            && !key.starts_with(PARTIAL_DIR);

        if !is_safe {
            return Err(AppError::Internal(format!("Invalid storage key '{}'", key)));
        }

        Ok(self.root.join(relative))
    }

    async fn purge_partials(&self) -> Result<usize> {
        let mut entries = fs::read_dir(&self.partial_dir)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read partial dir: {}", e)))?;

        let mut purged = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if fs::remove_file(entry.path()).await.is_ok() {
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn write_stream(
        file: std::fs::File,
        mut body: ByteStream<'_>,
        size_hint: Option<u64>,
    ) -> Result<u64> {
        let mut file = fs::File::from_std(file);
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                AppError::StorageWriteFailed(format!("Upload stream interrupted: {}", e))
            })?;

            written += chunk.len() as u64;
            if let Some(expected) = size_hint {
                if written > expected {
                    return Err(AppError::StorageWriteFailed(format!(
                        "Stream exceeded declared size of {} bytes",
                        expected
                    )));
                }
            }

            file.write_all(&chunk).await.map_err(write_failed)?;
        }

        if let Some(expected) = size_hint {
            if written != expected {
                return Err(AppError::StorageWriteFailed(format!(
                    "Stream ended after {} of {} declared bytes",
                    written, expected
                )));
            }
        }

        file.flush().await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        Ok(written)
    }
}

fn write_failed(e: io::Error) -> AppError {
    AppError::StorageWriteFailed(e.to_string())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, body: ByteStream<'_>, size_hint: Option<u64>) -> Result<u64> {
        let final_path = self.resolve(key)?;

        // The temp path is removed on drop, which covers both errors and cancellation
        let partial = tempfile::Builder::new()
            .prefix(&key.replace('/', "_"))
            .suffix(".partial")
            .tempfile_in(&self.partial_dir)
            .map_err(write_failed)?;
        let (file, partial_path) = partial.into_parts();

        let written = Self::write_stream(file, body, size_hint).await?;

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await.map_err(write_failed)?;
        }

        partial_path
            .persist(&final_path)
            .map_err(|e| write_failed(e.error))?;

        #[cfg(unix)]
        if let Some(parent) = final_path.parent() {
            if let Ok(dir) = fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }

        debug!("Committed blob '{}' ({} bytes)", key, written);
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        let path = self.resolve(key)?;

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("Blob '{}' not found", key)));
            }
            Err(e) => {
                return Err(AppError::InternalTransferError(format!(
                    "Failed to open blob '{}': {}",
                    key, e
                )));
            }
        };

        let size = file
            .metadata()
            .await
            .map_err(|e| AppError::InternalTransferError(e.to_string()))?
            .len();

        Ok(BlobReader {
            size,
            body: ReaderStream::new(file).boxed(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted blob '{}'", key);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(format!(
                "Failed to delete blob '{}': {}",
                key, e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to stat blob '{}': {}", key, e)))
    }

    async fn list_older_than(&self, prefix: &str, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let dir = self.resolve(prefix)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "Failed to list '{}': {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
        {
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping unreadable blob entry {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(time) => time.into(),
                Err(_) => continue,
            };

            if modified < cutoff {
                keys.push(format!(
                    "{}/{}",
                    prefix.trim_end_matches('/'),
                    entry.file_name().to_string_lossy()
                ));
            }
        }

        Ok(keys)
    }
}
