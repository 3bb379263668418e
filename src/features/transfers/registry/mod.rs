//! Transfer metadata registry
//!
//! The registry is the source of truth for which transfers exist. Ids that
//! have been reclaimed are remembered so that a new transfer can never be
//! registered under an id a previous share link pointed at.

mod memory;
mod postgres;

pub use memory::InMemoryTransferRegistry;
pub use postgres::PgTransferRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::error::Result;
use crate::features::transfers::models::Transfer;

#[async_trait]
pub trait TransferRegistry: Send + Sync {
    /// Insert a new transfer. Fails with `AppError::Conflict` if the id is
    /// live or was ever reclaimed.
    async fn create(&self, transfer: &Transfer) -> Result<()>;

    /// Fetch a transfer by id. Fails with `AppError::NotFound`.
    async fn get_by_id(&self, id: Uuid) -> Result<Transfer>;

    /// Atomically add one to the download counter and return the new value
    async fn increment_download_count(&self, id: Uuid) -> Result<i64>;

    /// Transfers with `expires_at <= cutoff`, ordered by id, after the `after` cursor
    async fn list_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Transfer>>;

    /// Transfers created before `cutoff`, ordered by id, after the `after` cursor
    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Transfer>>;

    /// Remove a transfer and retire its id. Returns false if it was already gone.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}
