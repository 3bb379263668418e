use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::TransferRegistry;
use crate::core::error::{AppError, Result};
use crate::features::transfers::models::Transfer;

const TRANSFER_COLUMNS: &str = "id, original_name, storage_ref, content_length, archived, \
     created_at, expires_at, download_count, sender_ref, recipient_ref";

/// Registry backed by the `transfers` and `transfer_tombstones` tables
pub struct PgTransferRegistry {
    pool: PgPool,
}

impl PgTransferRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn page_limit(limit: usize) -> i64 {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl TransferRegistry for PgTransferRegistry {
    async fn create(&self, transfer: &Transfer) -> Result<()> {
        // Insert only if the id is neither live nor tombstoned
        let result = sqlx::query(
            r#"
            INSERT INTO transfers (id, original_name, storage_ref, content_length, archived,
                                   created_at, expires_at, download_count, sender_ref, recipient_ref)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            WHERE NOT EXISTS (SELECT 1 FROM transfer_tombstones WHERE id = $1)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(transfer.id)
        .bind(&transfer.original_name)
        .bind(&transfer.storage_ref)
        .bind(transfer.content_length)
        .bind(transfer.archived)
        .bind(transfer.created_at)
        .bind(transfer.expires_at)
        .bind(transfer.download_count)
        .bind(&transfer.sender_ref)
        .bind(&transfer.recipient_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Transfer id {} is already in use",
                transfer.id
            )));
        }

        info!(
            "Transfer registered: id={}, size={}, expires_at={}",
            transfer.id, transfer.content_length, transfer.expires_at
        );
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Transfer> {
        let query = format!("SELECT {} FROM transfers WHERE id = $1", TRANSFER_COLUMNS);

        sqlx::query_as::<_, Transfer>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transfer {} not found", id)))
    }

    async fn increment_download_count(&self, id: Uuid) -> Result<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE transfers
            SET download_count = download_count + 1
            WHERE id = $1
            RETURNING download_count
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        count.ok_or_else(|| AppError::NotFound(format!("Transfer {} not found", id)))
    }

    async fn list_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Transfer>> {
        let query = format!(
            r#"
            SELECT {}
            FROM transfers
            WHERE expires_at <= $1 AND ($2::uuid IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
            TRANSFER_COLUMNS
        );

        let transfers = sqlx::query_as::<_, Transfer>(&query)
            .bind(cutoff)
            .bind(after)
            .bind(Self::page_limit(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(transfers)
    }

    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Transfer>> {
        let query = format!(
            r#"
            SELECT {}
            FROM transfers
            WHERE created_at < $1 AND ($2::uuid IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
            TRANSFER_COLUMNS
        );

        let transfers = sqlx::query_as::<_, Transfer>(&query)
            .bind(cutoff)
            .bind(after)
            .bind(Self::page_limit(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(transfers)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM transfers WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        sqlx::query(
            "INSERT INTO transfer_tombstones (id, reclaimed_at) VALUES ($1, NOW()) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("Transfer {} deleted (was present: {})", id, removed);
        Ok(removed)
    }
}
