//! Fixtures for transfer tests: a temp-dir backed harness with a manual
//! clock, plus blob store and registry wrappers that fail on demand.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::{stream, StreamExt};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use crate::core::clock::ManualClock;
use crate::core::config::TransferPolicyConfig;
use crate::core::error::{AppError, Result};
use crate::features::transfers::models::Transfer;
use crate::features::transfers::registry::{InMemoryTransferRegistry, TransferRegistry};
use crate::features::transfers::services::{IngestionService, RetrievalService, UploadMetadata};
use crate::features::transfers::workers::ReclamationSweeper;
use crate::modules::storage::{BlobReader, BlobStore, ByteStream, LocalBlobStore, SpoolDir};

pub fn body_of(parts: Vec<&'static str>) -> ByteStream<'static> {
    stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p.as_bytes())))).boxed()
}

pub async fn collect_body(mut body: ByteStream<'static>) -> io::Result<Vec<u8>> {
    let mut collected = Vec::new();
    while let Some(chunk) = body.next().await {
        collected.extend_from_slice(&chunk?);
    }
    Ok(collected)
}

pub fn metadata(name: &str, ttl_hours: Option<i64>) -> UploadMetadata {
    UploadMetadata {
        original_name: name.to_string(),
        ttl_hours,
        ..Default::default()
    }
}

/// Blob store wrapper with switchable failures
pub struct FaultyBlobStore {
    inner: LocalBlobStore,
    pub fail_put_mid_stream: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub fail_gets: AtomicBool,
}

impl FaultyBlobStore {
    fn injected(what: &str) -> AppError {
        AppError::Internal(format!("injected {} failure", what))
    }

    /// Remove a blob behind the registry's back
    pub async fn remove_silently(&self, key: &str) {
        self.inner.delete(key).await.unwrap();
    }

    /// Store bytes directly, bypassing ingestion
    pub async fn put_raw(&self, key: &str, content: &'static str) {
        self.inner
            .put(key, body_of(vec![content]), None)
            .await
            .unwrap();
    }
}

#[async_trait]
impl BlobStore for FaultyBlobStore {
    async fn put(&self, key: &str, body: ByteStream<'_>, size_hint: Option<u64>) -> Result<u64> {
        if self.fail_put_mid_stream.load(Ordering::SeqCst) {
            // Let the first chunk through, then break the stream
            let broken = body.take(1).chain(stream::once(async {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure"))
            }));
            return self.inner.put(key, broken.boxed(), None).await;
        }
        self.inner.put(key, body, size_hint).await
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn list_older_than(&self, prefix: &str, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        self.inner.list_older_than(prefix, cutoff).await
    }
}

/// Registry wrapper with switchable failures
#[derive(Default)]
pub struct FaultyRegistry {
    inner: InMemoryTransferRegistry,
    pub fail_creates: AtomicBool,
    pub conflicts_remaining: AtomicUsize,
    pub fail_delete_for: std::sync::Mutex<Option<Uuid>>,
}

impl FaultyRegistry {
    /// Insert a record directly, bypassing ingestion
    pub async fn insert_raw(&self, transfer: &Transfer) {
        self.inner.create(transfer).await.unwrap();
    }
}

#[async_trait]
impl TransferRegistry for FaultyRegistry {
    async fn create(&self, transfer: &Transfer) -> Result<()> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(AppError::Internal("injected registry outage".to_string()));
        }
        let pending = self.conflicts_remaining.load(Ordering::SeqCst);
        if pending > 0 {
            self.conflicts_remaining.store(pending - 1, Ordering::SeqCst);
            return Err(AppError::Conflict(format!("injected collision on {}", transfer.id)));
        }
        self.inner.create(transfer).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Transfer> {
        self.inner.get_by_id(id).await
    }

    async fn increment_download_count(&self, id: Uuid) -> Result<i64> {
        self.inner.increment_download_count(id).await
    }

    async fn list_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Transfer>> {
        self.inner.list_expired_before(cutoff, after, limit).await
    }

    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Transfer>> {
        self.inner.list_created_before(cutoff, after, limit).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let failing = *self.fail_delete_for.lock().unwrap();
        if failing == Some(id) {
            return Err(AppError::Internal(format!("injected delete failure for {}", id)));
        }
        self.inner.delete(id).await
    }
}

/// Services wired against temp directories, an in-memory registry and a manual clock
pub struct TestHarness {
    pub temp: TempDir,
    pub clock: Arc<ManualClock>,
    pub blobs: Arc<FaultyBlobStore>,
    pub registry: Arc<FaultyRegistry>,
    pub spool: Arc<SpoolDir>,
    pub policy: TransferPolicyConfig,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_policy(TransferPolicyConfig::default()).await
    }

    pub async fn with_policy(policy: TransferPolicyConfig) -> Self {
        let temp = TempDir::new().unwrap();
        let inner = LocalBlobStore::new(temp.path().join("blobs")).await.unwrap();
        let spool = SpoolDir::new(temp.path().join("spool")).unwrap();

        Self {
            clock: Arc::new(ManualClock::new(Self::epoch())),
            blobs: Arc::new(FaultyBlobStore {
                inner,
                fail_put_mid_stream: AtomicBool::new(false),
                fail_deletes: AtomicBool::new(false),
                fail_gets: AtomicBool::new(false),
            }),
            registry: Arc::new(FaultyRegistry::default()),
            spool: Arc::new(spool),
            policy,
            temp,
        }
    }

    /// Starting instant of the manual clock
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()
    }

    pub fn ingestion(&self) -> IngestionService {
        IngestionService::new(
            self.blobs.clone(),
            self.registry.clone(),
            self.spool.clone(),
            self.policy.clone(),
            self.clock.clone(),
        )
    }

    pub fn retrieval(&self) -> RetrievalService {
        RetrievalService::new(self.blobs.clone(), self.registry.clone(), self.clock.clone())
    }

    pub fn sweeper(&self) -> ReclamationSweeper {
        ReclamationSweeper::new(
            self.blobs.clone(),
            self.registry.clone(),
            self.spool.clone(),
            self.clock.clone(),
            &self.policy,
        )
    }

    /// Number of committed blobs on disk
    pub fn blob_count(&self) -> usize {
        let dir = self.temp.path().join("blobs").join("transfers");
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    /// Number of files left in the upload spool
    pub fn spool_count(&self) -> usize {
        std::fs::read_dir(self.temp.path().join("spool"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Upload `content` as `name` through the real pipeline
    pub async fn upload(&self, name: &str, content: &'static str, ttl_hours: i64) -> Transfer {
        self.ingestion()
            .ingest(body_of(vec![content]), metadata(name, Some(ttl_hours)))
            .await
            .unwrap()
    }
}
