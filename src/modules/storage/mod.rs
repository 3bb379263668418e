//! Storage module for transfer blobs
//!
//! Blobs are addressed only by keys derived from the transfer id, never by
//! the user-supplied filename. Two backends are provided: the local
//! filesystem and MinIO/S3-compatible object storage. Uploads are first
//! staged in a [`SpoolDir`] so nothing reaches a backend until the full
//! payload has been received.

mod local_store;
mod minio_store;
mod spool;

pub use local_store::LocalBlobStore;
pub use minio_store::MinIOBlobStore;
pub use spool::{SpoolDir, SpooledFile};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::core::error::Result;

/// Streamed blob content
pub type ByteStream<'a> = BoxStream<'a, std::io::Result<Bytes>>;

/// Key prefix under which every transfer blob lives
pub const TRANSFER_PREFIX: &str = "transfers";

/// Storage key for a transfer id
pub fn transfer_key(id: &Uuid) -> String {
    format!("{}/{}", TRANSFER_PREFIX, id)
}

/// Recover the transfer id from a storage key, if it is one of ours
pub fn transfer_id_from_key(key: &str) -> Option<Uuid> {
    key.strip_prefix(TRANSFER_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|id| Uuid::parse_str(id).ok())
}

/// An opened blob ready to be streamed
pub struct BlobReader {
    pub size: u64,
    pub body: ByteStream<'static>,
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Durable byte storage keyed by opaque storage keys
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob. All-or-nothing: on any error nothing is addressable under `key`.
    ///
    /// When `size_hint` is given, a stream of a different length is rejected.
    /// Returns the number of bytes committed.
    async fn put(&self, key: &str, body: ByteStream<'_>, size_hint: Option<u64>) -> Result<u64>;

    /// Open a blob for streaming. Missing keys fail with `AppError::NotFound`.
    async fn get(&self, key: &str) -> Result<BlobReader>;

    /// Delete a blob. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys under `prefix` last modified before `cutoff`
    async fn list_older_than(&self, prefix: &str, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}
