//! Upload staging area
//!
//! Every upload is streamed into a temp file named after its transfer id
//! before anything is committed to a blob store. Staged files are removed
//! when their handle is dropped, so an aborted or failed upload never leaves
//! bytes behind under a resolvable key.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::ByteStream;
use crate::core::error::{AppError, Result};

pub struct SpoolDir {
    root: PathBuf,
}

/// A fully received file in the spool. Removed from disk on drop.
#[derive(Debug)]
pub struct SpooledFile {
    path: TempPath,
    len: u64,
}

impl SpooledFile {
    pub(crate) fn new(path: TempPath, len: u64) -> Self {
        Self { path, len }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Stream the staged bytes back out
    pub async fn open_stream(&self) -> Result<ByteStream<'static>> {
        let file = fs::File::open(&*self.path).await.map_err(|e| {
            AppError::StorageWriteFailed(format!("Failed to reopen staged upload: {}", e))
        })?;
        Ok(ReaderStream::new(file).boxed())
    }
}

impl SpoolDir {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            AppError::Internal(format!(
                "Failed to create spool directory '{}': {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    /// Create an empty temp file for `id` inside the spool
    pub fn create_temp(&self, id: &Uuid, suffix: &str) -> Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(&format!("{}.", id))
            .suffix(suffix)
            .tempfile_in(&self.root)
            .map_err(|e| AppError::StorageWriteFailed(format!("Failed to create staging file: {}", e)))
    }

    /// Stream `body` into the spool, rejecting it once more than `limit` bytes arrive
    pub async fn receive(&self, id: &Uuid, mut body: ByteStream<'_>, limit: u64) -> Result<SpooledFile> {
        let (file, path) = self.create_temp(id, ".upload")?.into_parts();
        let mut file = fs::File::from_std(file);
        let mut received: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                AppError::StorageWriteFailed(format!("Upload stream interrupted: {}", e))
            })?;

            received += chunk.len() as u64;
            if received > limit {
                return Err(AppError::PayloadTooLarge(format!(
                    "File too large. Maximum size is {} bytes",
                    limit
                )));
            }

            file.write_all(&chunk).await.map_err(write_failed)?;
        }

        file.flush().await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;

        Ok(SpooledFile::new(path, received))
    }

    /// Remove staged files older than `cutoff`, left behind by a crashed process
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read spool directory: {}", e)))?;

        let mut purged = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let stale = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified) < cutoff,
                Err(_) => false,
            };

            if stale && fs::remove_file(entry.path()).await.is_ok() {
                purged += 1;
            }
        }

        Ok(purged)
    }
}

fn write_failed(e: io::Error) -> AppError {
    AppError::StorageWriteFailed(e.to_string())
}
