//! MinIO/S3-compatible blob store
//!
//! Uses rust-s3 for lightweight S3 operations. Bodies are streamed in both
//! directions. An object only becomes visible once its PUT (or multipart
//! completion) succeeds, so no staging area is needed in the bucket.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use s3::creds::Credentials;
use s3::{Bucket, BucketConfiguration, Region};
use std::io;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::{BlobReader, BlobStore, ByteStream};
use crate::core::config::MinIOConfig;
use crate::core::error::{AppError, Result};

const CONTENT_TYPE: &str = "application/octet-stream";

/// MinIO/S3-compatible storage backend for transfer blobs
pub struct MinIOBlobStore {
    bucket: Box<Bucket>,
    region: Region,
    credentials: Credentials,
    endpoint: String,
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_missing(error: &s3::error::S3Error) -> bool {
    let error_str = error.to_string();
    error_str.contains("404") || error_str.contains("NoSuchKey")
}

fn check_read_status(key: &str, status: u16) -> Result<()> {
    match status {
        status if is_success(status) => Ok(()),
        404 => Err(AppError::NotFound(format!("Blob '{}' not found", key))),
        status => Err(AppError::InternalTransferError(format!(
            "Read of blob '{}' returned status {}",
            key, status
        ))),
    }
}

impl MinIOBlobStore {
    /// Create a new store from configuration, creating the bucket if needed
    pub async fn new(config: MinIOConfig) -> Result<Self> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| AppError::Internal(format!("Failed to create MinIO credentials: {}", e)))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let mut bucket = Bucket::new(&config.bucket, region.clone(), credentials.clone())
            .map_err(|e| AppError::Internal(format!("Failed to create MinIO bucket: {}", e)))?;

        // Use path-style URLs for MinIO (http://endpoint/bucket instead of http://bucket.endpoint)
        bucket.set_path_style();

        let store = Self {
            bucket,
            region,
            credentials,
            endpoint: config.endpoint,
        };

        store.ensure_bucket_exists().await;

        info!("MinIO blob store initialized for endpoint: {}", store.endpoint);

        Ok(store)
    }

    /// Ensure the bucket exists, create if not
    async fn ensure_bucket_exists(&self) {
        let result = Bucket::create_with_path_style(
            &self.bucket.name(),
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await;

        match result {
            Ok(_) => info!("Bucket '{}' created successfully", self.bucket.name()),
            Err(e) => {
                let error_str = e.to_string();
                if error_str.contains("BucketAlreadyOwnedByYou")
                    || error_str.contains("BucketAlreadyExists")
                    || error_str.contains("already own it")
                {
                    debug!("Bucket '{}' already exists", self.bucket.name());
                } else {
                    // Bucket might exist with a different error; uploads will surface real failures
                    warn!(
                        "Could not create bucket '{}': {}. Assuming it exists.",
                        self.bucket.name(),
                        e
                    );
                }
            }
        }
    }

    pub fn bucket_name(&self) -> String {
        self.bucket.name()
    }
}

#[async_trait]
impl BlobStore for MinIOBlobStore {
    async fn put(&self, key: &str, body: ByteStream<'_>, size_hint: Option<u64>) -> Result<u64> {
        // Objects under the multipart threshold go up in one PUT, larger ones as parts
        let mut reader = StreamReader::new(body);
        let response = self
            .bucket
            .put_object_stream_with_content_type(&mut reader, key, CONTENT_TYPE)
            .await
            .map_err(|e| {
                AppError::StorageWriteFailed(format!("Failed to upload blob '{}': {}", key, e))
            })?;

        if !is_success(response.status_code()) {
            return Err(AppError::StorageWriteFailed(format!(
                "Upload of blob '{}' returned status {}",
                key,
                response.status_code()
            )));
        }

        let written = response.uploaded_bytes() as u64;
        if let Some(expected) = size_hint {
            if written != expected {
                if let Err(e) = self.delete(key).await {
                    warn!("Failed to remove mis-sized blob '{}': {}", key, e);
                }
                return Err(AppError::StorageWriteFailed(format!(
                    "Stream carried {} of {} declared bytes",
                    written, expected
                )));
            }
        }

        debug!("Uploaded blob '{}' to bucket '{}'", key, self.bucket.name());
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        let (head, status) = match self.bucket.head_object(key).await {
            Ok(head) => head,
            Err(e) if is_missing(&e) => {
                return Err(AppError::NotFound(format!("Blob '{}' not found", key)));
            }
            Err(e) => {
                return Err(AppError::InternalTransferError(format!(
                    "Failed to inspect blob '{}': {}",
                    key, e
                )));
            }
        };
        check_read_status(key, status)?;

        let size = head
            .content_length
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| {
                AppError::InternalTransferError(format!("Blob '{}' has no content length", key))
            })?;

        let response = match self.bucket.get_object_stream(key).await {
            Ok(response) => response,
            Err(e) if is_missing(&e) => {
                return Err(AppError::NotFound(format!("Blob '{}' not found", key)));
            }
            Err(e) => {
                return Err(AppError::InternalTransferError(format!(
                    "Failed to download blob '{}': {}",
                    key, e
                )));
            }
        };
        check_read_status(key, response.status_code)?;

        let body = response
            .bytes
            .map(|chunk| chunk.map_err(|e| io::Error::other(e.to_string())))
            .boxed();

        Ok(BlobReader { size, body })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.bucket.delete_object(key).await {
            Ok(response) if is_success(response.status_code()) || response.status_code() == 404 => {
                debug!("Deleted blob '{}' from bucket '{}'", key, self.bucket.name());
                Ok(())
            }
            Ok(response) => Err(AppError::Internal(format!(
                "Delete of blob '{}' returned status {}",
                key,
                response.status_code()
            ))),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(AppError::Internal(format!(
                "Failed to delete blob '{}': {}",
                key, e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.bucket.head_object(key).await {
            Ok((_, status)) => Ok(is_success(status)),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(AppError::Internal(format!(
                "Failed to check if blob '{}' exists: {}",
                key, e
            ))),
        }
    }

    async fn list_older_than(&self, prefix: &str, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let pages = self
            .bucket
            .list(format!("{}/", prefix.trim_end_matches('/')), None)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to list '{}': {}", prefix, e)))?;

        let keys = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .filter(|object| {
                match DateTime::parse_from_rfc3339(&object.last_modified) {
                    Ok(modified) => modified.with_timezone(&Utc) < cutoff,
                    Err(e) => {
                        warn!(
                            "Unparseable last_modified '{}' on '{}': {}",
                            object.last_modified, object.key, e
                        );
                        false
                    }
                }
            })
            .map(|object| object.key)
            .collect();

        Ok(keys)
    }
}
