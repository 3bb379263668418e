use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::core::clock::Clock;
use crate::core::config::TransferPolicyConfig;
use crate::core::error::{AppError, Result};
use crate::features::transfers::models::Transfer;
use crate::features::transfers::registry::TransferRegistry;
use crate::modules::storage::{transfer_id_from_key, BlobStore, SpoolDir, TRANSFER_PREFIX};

/// Records fetched per registry page
const SWEEP_BATCH_SIZE: usize = 100;

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_reclaimed: usize,
    pub orphan_blobs_removed: usize,
    pub dangling_records_removed: usize,
    pub stale_spool_files_removed: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Background worker that reclaims expired transfers and repairs
/// blob/record mismatches left behind by crashes
pub struct ReclamationSweeper {
    blob_store: Arc<dyn BlobStore>,
    registry: Arc<dyn TransferRegistry>,
    spool: Arc<SpoolDir>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
    orphan_grace: chrono::Duration,
    orphan_scan_enabled: bool,
}

impl ReclamationSweeper {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        registry: Arc<dyn TransferRegistry>,
        spool: Arc<SpoolDir>,
        clock: Arc<dyn Clock>,
        policy: &TransferPolicyConfig,
    ) -> Self {
        let orphan_grace =
            chrono::Duration::from_std(policy.orphan_grace).unwrap_or(chrono::Duration::hours(1));

        Self {
            blob_store,
            registry,
            spool,
            clock,
            sweep_interval: policy.sweep_interval,
            orphan_grace,
            orphan_scan_enabled: policy.orphan_scan_enabled,
        }
    }

    /// Run the sweeper in a background loop
    pub async fn run(&self) {
        tracing::info!(
            "Starting reclamation sweeper (every {}s)",
            self.sweep_interval.as_secs()
        );

        let mut interval = interval(self.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let report = self.sweep_once().await;
            if report.is_empty() {
                tracing::debug!("Sweep finished, nothing to reclaim");
            } else {
                tracing::info!("Sweep finished: {:?}", report);
            }
        }
    }

    /// One full pass: expired transfers first, then the orphan scan.
    ///
    /// Individual failures are counted and skipped; the next pass retries them.
    pub async fn sweep_once(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        self.reclaim_expired(now, &mut report).await;

        if self.orphan_scan_enabled {
            let cutoff = now - self.orphan_grace;
            self.remove_orphan_blobs(cutoff, &mut report).await;
            self.remove_dangling_records(cutoff, &mut report).await;

            match self.spool.purge_older_than(cutoff).await {
                Ok(purged) => report.stale_spool_files_removed += purged,
                Err(e) => {
                    tracing::error!("Failed to purge stale spool files: {}", e);
                    report.failures += 1;
                }
            }
        }

        report
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let mut cursor: Option<Uuid> = None;

        loop {
            let batch = match self
                .registry
                .list_expired_before(now, cursor, SWEEP_BATCH_SIZE)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!("Failed to list expired transfers: {}", e);
                    report.failures += 1;
                    return;
                }
            };

            let Some(last) = batch.last() else {
                return;
            };
            cursor = Some(last.id);
            let is_last_page = batch.len() < SWEEP_BATCH_SIZE;

            for transfer in &batch {
                match self.reclaim(transfer).await {
                    Ok(()) => report.expired_reclaimed += 1,
                    Err(e) => {
                        tracing::error!("Failed to reclaim transfer {}: {}", transfer.id, e);
                        report.failures += 1;
                    }
                }
            }

            if is_last_page {
                return;
            }
        }
    }

    /// Blob first, then the record. A crash in between leaves a record whose
    /// blob is gone, which readers already treat as not found.
    async fn reclaim(&self, transfer: &Transfer) -> Result<()> {
        self.blob_store.delete(&transfer.storage_ref).await?;
        self.registry.delete(transfer.id).await?;

        tracing::info!(
            "Reclaimed transfer {} (expired at {}, downloaded {} times)",
            transfer.id,
            transfer.expires_at,
            transfer.download_count
        );
        Ok(())
    }

    /// Delete blobs older than `cutoff` that no record points at
    async fn remove_orphan_blobs(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) {
        let keys = match self.blob_store.list_older_than(TRANSFER_PREFIX, cutoff).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("Failed to list blobs for orphan scan: {}", e);
                report.failures += 1;
                return;
            }
        };

        for key in keys {
            let Some(id) = transfer_id_from_key(&key) else {
                tracing::debug!("Skipping foreign key '{}' in orphan scan", key);
                continue;
            };

            match self.remove_if_orphaned(id, &key).await {
                Ok(true) => report.orphan_blobs_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Failed to check blob '{}': {}", key, e);
                    report.failures += 1;
                }
            }
        }
    }

    async fn remove_if_orphaned(&self, id: Uuid, key: &str) -> Result<bool> {
        match self.registry.get_by_id(id).await {
            Ok(_) => Ok(false),
            Err(AppError::NotFound(_)) => {
                self.blob_store.delete(key).await?;
                tracing::warn!("Removed orphan blob '{}'", key);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete records older than `cutoff` whose blob no longer exists
    async fn remove_dangling_records(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) {
        let mut cursor: Option<Uuid> = None;

        loop {
            let batch = match self
                .registry
                .list_created_before(cutoff, cursor, SWEEP_BATCH_SIZE)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!("Failed to list transfers for orphan scan: {}", e);
                    report.failures += 1;
                    return;
                }
            };

            let Some(last) = batch.last() else {
                return;
            };
            cursor = Some(last.id);
            let is_last_page = batch.len() < SWEEP_BATCH_SIZE;

            for transfer in &batch {
                match self.remove_if_dangling(transfer).await {
                    Ok(true) => report.dangling_records_removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("Failed to check transfer {}: {}", transfer.id, e);
                        report.failures += 1;
                    }
                }
            }

            if is_last_page {
                return;
            }
        }
    }

    async fn remove_if_dangling(&self, transfer: &Transfer) -> Result<bool> {
        if self.blob_store.exists(&transfer.storage_ref).await? {
            return Ok(false);
        }

        self.registry.delete(transfer.id).await?;
        tracing::warn!(
            "Removed transfer {} whose blob '{}' was missing",
            transfer.id,
            transfer.storage_ref
        );
        Ok(true)
    }
}
