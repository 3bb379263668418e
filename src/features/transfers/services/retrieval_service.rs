use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use std::io;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::core::clock::Clock;
use crate::core::error::{AppError, Result};
use crate::features::transfers::models::Transfer;
use crate::features::transfers::registry::TransferRegistry;
use crate::modules::storage::{BlobStore, ByteStream};

/// An opened transfer ready to be streamed to the recipient
pub struct Download {
    pub transfer: Transfer,
    pub body: ByteStream<'static>,
}

/// Service for resolving share links
pub struct RetrievalService {
    blob_store: Arc<dyn BlobStore>,
    registry: Arc<dyn TransferRegistry>,
    clock: Arc<dyn Clock>,
}

impl RetrievalService {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        registry: Arc<dyn TransferRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            blob_store,
            registry,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Look up a live transfer without touching its download count
    pub async fn describe(&self, id: Uuid) -> Result<Transfer> {
        let transfer = self.registry.get_by_id(id).await?;

        if transfer.is_expired_at(self.clock.now()) {
            return Err(AppError::Expired(format!(
                "Transfer {} expired at {}",
                id, transfer.expires_at
            )));
        }

        Ok(transfer)
    }

    /// Open a live transfer for streaming.
    ///
    /// Expiry is only checked here; a stream that has started is allowed to
    /// finish. The download count is incremented once the returned body has
    /// delivered exactly `content_length` bytes.
    pub async fn download(&self, id: Uuid) -> Result<Download> {
        let transfer = self.describe(id).await?;

        let reader = match self.blob_store.get(&transfer.storage_ref).await {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => {
                warn!("Transfer {} is registered but its blob is missing", id);
                return Err(AppError::NotFound(format!("Transfer {} not found", id)));
            }
            Err(e) => return Err(AppError::InternalTransferError(e.to_string())),
        };

        let expected = transfer.content_length as u64;
        if reader.size != expected {
            return Err(AppError::InternalTransferError(format!(
                "Blob for transfer {} holds {} bytes, expected {}",
                id, reader.size, expected
            )));
        }

        debug!("Streaming transfer {} ({} bytes)", id, expected);

        Ok(Download {
            body: count_on_completion(reader.body, expected, id, self.registry.clone()),
            transfer,
        })
    }
}

struct Delivery {
    body: ByteStream<'static>,
    delivered: u64,
    expected: u64,
    id: Uuid,
    registry: Arc<dyn TransferRegistry>,
    recorded: bool,
}

impl Delivery {
    fn is_complete(&self) -> bool {
        self.delivered == self.expected
    }

    async fn record(&mut self) {
        if !self.recorded {
            self.recorded = true;
            record_delivery(self.registry.clone(), self.id).await;
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        // An empty body can be dropped by the server without ever being polled
        if self.recorded || !self.is_complete() {
            return;
        }

        let registry = self.registry.clone();
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(record_delivery(registry, id));
        }
    }
}

/// Wrap a blob stream so that a complete delivery is recorded on the transfer.
///
/// The count is taken as the final byte is yielded: once `Content-Length`
/// bytes are written the server drops the body without polling it to its end.
/// Short or overlong blobs end the stream with an error instead of being counted.
fn count_on_completion(
    body: ByteStream<'static>,
    expected: u64,
    id: Uuid,
    registry: Arc<dyn TransferRegistry>,
) -> ByteStream<'static> {
    let delivery = Delivery {
        body,
        delivered: 0,
        expected,
        id,
        registry,
        recorded: false,
    };

    stream::unfold(Some(delivery), |state| async move {
        let mut delivery = state?;

        match delivery.body.next().await {
            Some(Ok(chunk)) => {
                delivery.delivered += chunk.len() as u64;
                if delivery.delivered > delivery.expected {
                    return Some((Err(length_mismatch(&delivery)), None));
                }
                if delivery.is_complete() {
                    delivery.record().await;
                }
                Some((Ok(chunk), Some(delivery)))
            }
            Some(Err(e)) => {
                warn!("Stream of transfer {} failed: {}", delivery.id, e);
                Some((Err(e), None))
            }
            None if !delivery.is_complete() => Some((Err(length_mismatch(&delivery)), None)),
            None => {
                delivery.record().await;
                None
            }
        }
    })
    .boxed()
}

/// Count a finished download. Runs detached so a client hanging up right
/// after the last byte cannot cancel the update.
async fn record_delivery(registry: Arc<dyn TransferRegistry>, id: Uuid) {
    let update = tokio::spawn(async move { registry.increment_download_count(id).await });

    match update.await {
        Ok(Ok(count)) => debug!("Transfer {} downloaded ({} total)", id, count),
        Ok(Err(e)) => error!("Failed to record download of transfer {}: {}", id, e),
        Err(e) => error!("Download counter task for transfer {} failed: {}", id, e),
    }
}

fn length_mismatch(delivery: &Delivery) -> io::Error {
    error!(
        "Blob for transfer {} delivered {} bytes, expected {}",
        delivery.id, delivery.delivered, delivery.expected
    );
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("transfer {} blob length mismatch", delivery.id),
    )
}
