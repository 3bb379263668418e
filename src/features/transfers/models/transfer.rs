use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::modules::archive::ARCHIVE_CONTENT_TYPE;

/// Database model for transfers
///
/// One row per upload. `id` doubles as the bearer token in share links;
/// `storage_ref` is never exposed outside the service.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Transfer {
    pub id: Uuid,
    pub original_name: String,
    pub storage_ref: String,
    /// Length of the stored artifact in bytes (the archive when `archived`)
    pub content_length: i64,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub download_count: i64,
    pub sender_ref: Option<String>,
    pub recipient_ref: Option<String>,
}

impl Transfer {
    /// Logical expiry: at or past `expires_at` the transfer is never served
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds left before expiry, zero once expired
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Filename presented to the downloader
    pub fn download_name(&self) -> String {
        if self.archived {
            format!("{}.zip", self.original_name)
        } else {
            self.original_name.clone()
        }
    }

    pub fn content_type(&self) -> &'static str {
        if self.archived {
            ARCHIVE_CONTENT_TYPE
        } else {
            "application/octet-stream"
        }
    }
}
