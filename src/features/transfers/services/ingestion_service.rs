//! Upload pipeline
//!
//! An upload moves through explicit stages, each consuming the previous one:
//! [`SpooledUpload`] (bytes fully received into the spool) ->
//! [`PreparedArtifact`] (raw or packaged file ready to commit) ->
//! [`CommittedBlob`] (bytes durable in the blob store) -> registered
//! [`Transfer`]. A record is only created once its blob is committed, and a
//! blob whose registration fails is deleted again before the error is
//! returned.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::clock::Clock;
use crate::core::config::TransferPolicyConfig;
use crate::core::error::{AppError, Result};
use crate::features::transfers::models::Transfer;
use crate::features::transfers::registry::TransferRegistry;
use crate::modules::archive::ArchivePackager;
use crate::modules::storage::{transfer_key, BlobStore, ByteStream, SpoolDir, SpooledFile};
use crate::shared::validation::sanitize_filename;

/// Attempts at finding an unused id before giving up
const MAX_REGISTRATION_ATTEMPTS: usize = 3;

/// Caller-supplied details that accompany the uploaded bytes
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub original_name: String,
    pub ttl_hours: Option<i64>,
    pub sender_ref: Option<String>,
    pub recipient_ref: Option<String>,
}

/// An upload whose bytes have been fully received into the spool
#[derive(Debug)]
pub struct SpooledUpload {
    id: Uuid,
    file: SpooledFile,
}

impl SpooledUpload {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// The exact bytes that will be committed for a transfer
#[derive(Debug)]
pub struct PreparedArtifact {
    id: Uuid,
    file: SpooledFile,
    archived: bool,
}

/// Bytes durably stored under `storage_ref`
#[derive(Debug)]
pub struct CommittedBlob {
    storage_ref: String,
    content_length: u64,
}

pub struct IngestionService {
    blob_store: Arc<dyn BlobStore>,
    registry: Arc<dyn TransferRegistry>,
    spool: Arc<SpoolDir>,
    packager: Option<ArchivePackager>,
    policy: TransferPolicyConfig,
    clock: Arc<dyn Clock>,
}

impl IngestionService {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        registry: Arc<dyn TransferRegistry>,
        spool: Arc<SpoolDir>,
        policy: TransferPolicyConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let packager = policy.archive_uploads.then(ArchivePackager::new);

        Self {
            blob_store,
            registry,
            spool,
            packager,
            policy,
            clock,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.policy.max_upload_bytes
    }

    /// Reject an upload up front when its declared size already exceeds the limit
    pub fn check_declared_size(&self, declared: Option<u64>) -> Result<()> {
        match declared {
            Some(size) if size > self.policy.max_upload_bytes => Err(too_large(self.policy.max_upload_bytes)),
            _ => Ok(()),
        }
    }

    /// Stage the upload body, enforcing the size limit while bytes arrive
    pub async fn receive(&self, body: ByteStream<'_>) -> Result<SpooledUpload> {
        let id = Uuid::new_v4();
        let file = self
            .spool
            .receive(&id, body, self.policy.max_upload_bytes)
            .await?;

        debug!("Received upload {} ({} bytes)", id, file.len());
        Ok(SpooledUpload { id, file })
    }

    /// Turn a staged upload into the artifact that will be stored
    async fn prepare(&self, upload: SpooledUpload, original_name: &str) -> Result<PreparedArtifact> {
        let Some(packager) = &self.packager else {
            return Ok(PreparedArtifact {
                id: upload.id,
                file: upload.file,
                archived: false,
            });
        };

        let packaged = packager
            .package(&upload.id, &upload.file, original_name, &self.spool)
            .await?;

        Ok(PreparedArtifact {
            id: upload.id,
            file: packaged,
            archived: true,
        })
    }

    async fn commit(&self, id: &Uuid, artifact: &PreparedArtifact) -> Result<CommittedBlob> {
        let storage_ref = transfer_key(id);
        let body = artifact.file.open_stream().await?;

        let content_length = self
            .blob_store
            .put(&storage_ref, body, Some(artifact.file.len()))
            .await
            .map_err(|e| match e {
                AppError::StorageWriteFailed(_) => e,
                other => AppError::StorageWriteFailed(other.to_string()),
            })?;

        Ok(CommittedBlob {
            storage_ref,
            content_length,
        })
    }

    /// Best-effort removal of a committed blob that could not be registered
    async fn compensate(&self, blob: &CommittedBlob) {
        match self.blob_store.delete(&blob.storage_ref).await {
            Ok(()) => warn!("Removed unregistered blob '{}'", blob.storage_ref),
            Err(e) => warn!(
                "Failed to remove unregistered blob '{}', leaving it to the orphan scan: {}",
                blob.storage_ref, e
            ),
        }
    }

    /// Package (if enabled), commit and register a staged upload
    pub async fn register(&self, upload: SpooledUpload, metadata: UploadMetadata) -> Result<Transfer> {
        let original_name = sanitize_filename(&metadata.original_name);
        let ttl_hours = self.policy.clamp_ttl_hours(metadata.ttl_hours);
        let ttl = chrono::Duration::try_hours(ttl_hours)
            .ok_or_else(|| AppError::Internal(format!("TTL of {} hours is out of range", ttl_hours)))?;
        let artifact = self.prepare(upload, &original_name).await?;

        let mut id = artifact.id;
        let mut attempt = 1;
        loop {
            // A key that already holds bytes belongs to someone else
            if self.blob_store.exists(&transfer_key(&id)).await? {
                id = self.next_id(id, &mut attempt)?;
                continue;
            }

            let created_at = self.clock.now();
            let expires_at = created_at.checked_add_signed(ttl).ok_or_else(|| {
                AppError::Internal(format!("TTL of {} hours overflows the expiry time", ttl_hours))
            })?;
            let blob = self.commit(&id, &artifact).await?;
            let transfer = Transfer {
                id,
                original_name: original_name.clone(),
                storage_ref: blob.storage_ref.clone(),
                content_length: i64::try_from(blob.content_length)
                    .map_err(|_| too_large(self.policy.max_upload_bytes))?,
                archived: artifact.archived,
                created_at,
                expires_at,
                download_count: 0,
                sender_ref: metadata.sender_ref.clone(),
                recipient_ref: metadata.recipient_ref.clone(),
            };

            match self.registry.create(&transfer).await {
                Ok(()) => {
                    info!(
                        "Transfer {} created: name='{}', size={}, archived={}, expires_at={}",
                        transfer.id,
                        transfer.original_name,
                        transfer.content_length,
                        transfer.archived,
                        transfer.expires_at
                    );
                    return Ok(transfer);
                }
                Err(AppError::Conflict(msg)) => {
                    self.compensate(&blob).await;
                    warn!("Transfer id collision ({}), retrying with a new id", msg);
                    id = self.next_id(id, &mut attempt)?;
                }
                Err(e) => {
                    self.compensate(&blob).await;
                    return Err(AppError::RegistrationFailed(e.to_string()));
                }
            }
        }
    }

    fn next_id(&self, taken: Uuid, attempt: &mut usize) -> Result<Uuid> {
        if *attempt >= MAX_REGISTRATION_ATTEMPTS {
            return Err(AppError::RegistrationFailed(format!(
                "No unused transfer id after {} attempts (last tried {})",
                MAX_REGISTRATION_ATTEMPTS, taken
            )));
        }
        *attempt += 1;
        Ok(Uuid::new_v4())
    }

    /// Receive and register in one step
    pub async fn ingest(&self, body: ByteStream<'_>, metadata: UploadMetadata) -> Result<Transfer> {
        let upload = self.receive(body).await?;
        self.register(upload, metadata).await
    }
}

fn too_large(limit: u64) -> AppError {
    AppError::PayloadTooLarge(format!("File too large. Maximum size is {} bytes", limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_helpers::{body_of, collect_body, metadata, TestHarness};
    use chrono::Duration;
    use std::io::Read;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_upload_is_immediately_describable() {
        let harness = TestHarness::new().await;

        let transfer = harness.upload("note.txt", "0123456789", 1).await;
        let described = harness.retrieval().describe(transfer.id).await.unwrap();

        assert_eq!(described.original_name, "note.txt");
        assert_eq!(described.content_length, 10);
        assert_eq!(described.download_count, 0);
        assert_eq!(described.expires_at - described.created_at, Duration::hours(1));
        assert_eq!(harness.spool_count(), 0);
    }

    #[tokio::test]
    async fn test_ttl_is_clamped() {
        let harness = TestHarness::new().await;
        let service = harness.ingestion();

        let long = service
            .ingest(body_of(vec!["x"]), metadata("a", Some(500)))
            .await
            .unwrap();
        let short = service
            .ingest(body_of(vec!["x"]), metadata("b", Some(0)))
            .await
            .unwrap();
        let default = service
            .ingest(body_of(vec!["x"]), metadata("c", None))
            .await
            .unwrap();

        assert_eq!(long.expires_at - long.created_at, Duration::hours(24));
        assert_eq!(short.expires_at - short.created_at, Duration::hours(1));
        assert_eq!(default.expires_at - default.created_at, Duration::hours(24));
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_fails_without_storing() {
        let harness = TestHarness::with_policy(TransferPolicyConfig {
            max_ttl_hours: i64::MAX,
            ..Default::default()
        })
        .await;

        let result = harness
            .ingestion()
            .ingest(body_of(vec!["x"]), metadata("forever.txt", Some(i64::MAX)))
            .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(harness.blob_count(), 0);
        assert_eq!(harness.spool_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_upload_is_accepted() {
        let harness = TestHarness::new().await;

        let transfer = harness
            .ingestion()
            .ingest(body_of(vec![]), metadata("empty.bin", None))
            .await
            .unwrap();

        assert_eq!(transfer.content_length, 0);
        assert_eq!(harness.blob_count(), 1);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let harness = TestHarness::with_policy(TransferPolicyConfig {
            max_upload_bytes: 8,
            ..Default::default()
        })
        .await;
        let service = harness.ingestion();

        assert!(matches!(
            service.check_declared_size(Some(9)),
            Err(AppError::PayloadTooLarge(_))
        ));
        assert!(service.check_declared_size(Some(8)).is_ok());
        assert!(service.check_declared_size(None).is_ok());

        let result = service
            .ingest(body_of(vec!["1234", "5678", "9"]), metadata("big.bin", None))
            .await;

        assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
        assert_eq!(harness.blob_count(), 0);
        assert_eq!(harness.spool_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_nothing_behind() {
        let harness = TestHarness::new().await;
        harness.blobs.fail_put_mid_stream.store(true, Ordering::SeqCst);

        let upload = harness
            .ingestion()
            .receive(body_of(vec!["first chunk", "second chunk"]))
            .await
            .unwrap();
        let attempted = upload.id();

        let result = harness
            .ingestion()
            .register(upload, metadata("doomed.txt", None))
            .await;

        assert!(matches!(result, Err(AppError::StorageWriteFailed(_))));
        assert!(harness
            .retrieval()
            .describe(attempted)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(!harness.blobs.exists(&transfer_key(&attempted)).await.unwrap());
        assert_eq!(harness.blob_count(), 0);
        assert_eq!(harness.spool_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_registration_removes_blob() {
        let harness = TestHarness::new().await;
        harness.registry.fail_creates.store(true, Ordering::SeqCst);

        let result = harness
            .ingestion()
            .ingest(body_of(vec!["payload"]), metadata("a.txt", None))
            .await;

        assert!(matches!(result, Err(AppError::RegistrationFailed(_))));
        assert_eq!(harness.blob_count(), 0);
        assert_eq!(harness.spool_count(), 0);
    }

    #[tokio::test]
    async fn test_id_collision_retries_with_fresh_id() {
        let harness = TestHarness::new().await;
        harness.registry.conflicts_remaining.store(2, Ordering::SeqCst);

        let upload = harness
            .ingestion()
            .receive(body_of(vec!["payload"]))
            .await
            .unwrap();
        let first_id = upload.id();

        let transfer = harness
            .ingestion()
            .register(upload, metadata("a.txt", None))
            .await
            .unwrap();

        assert_ne!(transfer.id, first_id);
        assert_eq!(transfer.storage_ref, transfer_key(&transfer.id));
        assert_eq!(harness.blob_count(), 1);
    }

    #[tokio::test]
    async fn test_persistent_collisions_give_up() {
        let harness = TestHarness::new().await;
        harness.registry.conflicts_remaining.store(10, Ordering::SeqCst);

        let result = harness
            .ingestion()
            .ingest(body_of(vec!["payload"]), metadata("a.txt", None))
            .await;

        assert!(matches!(result, Err(AppError::RegistrationFailed(_))));
        assert_eq!(harness.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_unsafe_filename_is_sanitized() {
        let harness = TestHarness::new().await;

        let transfer = harness.upload("../../etc/passwd", "root", 1).await;

        assert!(!transfer.original_name.contains('/'));
        assert_eq!(transfer.storage_ref, transfer_key(&transfer.id));
    }

    #[tokio::test]
    async fn test_archive_mode_stores_single_entry_zip() {
        let harness = TestHarness::with_policy(TransferPolicyConfig {
            archive_uploads: true,
            ..Default::default()
        })
        .await;

        let transfer = harness.upload("report.csv", "a,b,c\n1,2,3\n", 2).await;
        assert!(transfer.archived);
        assert_eq!(transfer.download_name(), "report.csv.zip");

        let download = harness.retrieval().download(transfer.id).await.unwrap();
        let bytes = collect_body(download.body).await.unwrap();
        assert_eq!(bytes.len() as i64, transfer.content_length);

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_index(0).unwrap();
        assert_eq!(entry.name(), "report.csv");
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "a,b,c\n1,2,3\n");
        drop(entry);

        assert_eq!(harness.spool_count(), 0);
    }
}
