use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tracing::debug;
use uuid::Uuid;

use super::TransferRegistry;
use crate::core::error::{AppError, Result};
use crate::features::transfers::models::Transfer;

/// Process-local registry, used when no database is configured
#[derive(Debug, Default)]
pub struct InMemoryTransferRegistry {
    transfers: DashMap<Uuid, Transfer>,
    retired: DashSet<Uuid>,
}

impl InMemoryTransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn page<F>(&self, after: Option<Uuid>, limit: usize, keep: F) -> Vec<Transfer>
    where
        F: Fn(&Transfer) -> bool,
    {
        let mut matching: Vec<Transfer> = self
            .transfers
            .iter()
            .filter(|entry| after.map_or(true, |cursor| *entry.key() > cursor))
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        matching.sort_by_key(|t| t.id);
        matching.truncate(limit);
        matching
    }
}

#[async_trait]
impl TransferRegistry for InMemoryTransferRegistry {
    async fn create(&self, transfer: &Transfer) -> Result<()> {
        if self.retired.contains(&transfer.id) {
            return Err(AppError::Conflict(format!(
                "Transfer id {} has already been used",
                transfer.id
            )));
        }

        match self.transfers.entry(transfer.id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "Transfer {} already exists",
                transfer.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(transfer.clone());
                debug!("Registered transfer {}", transfer.id);
                Ok(())
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Transfer> {
        self.transfers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("Transfer {} not found", id)))
    }

    async fn increment_download_count(&self, id: Uuid) -> Result<i64> {
        let mut entry = self
            .transfers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Transfer {} not found", id)))?;

        entry.download_count += 1;
        Ok(entry.download_count)
    }

    async fn list_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Transfer>> {
        Ok(self.page(after, limit, |t| t.expires_at <= cutoff))
    }

    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Transfer>> {
        Ok(self.page(after, limit, |t| t.created_at < cutoff))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.retired.insert(id);
        Ok(self.transfers.remove(&id).is_some())
    }
}
