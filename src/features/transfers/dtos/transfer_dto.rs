use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::features::transfers::models::Transfer;

/// Allowance on top of the upload limit for multipart framing and form fields
pub const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Upload transfer request DTO for OpenAPI documentation
/// Note: This struct is for Swagger UI documentation only.
/// The actual handler streams the `file` part with axum's Multipart extractor.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct UploadTransferDto {
    /// The file to share
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// Requested lifetime in hours, clamped to the allowed range
    #[schema(example = 24)]
    pub ttl_hours: Option<i64>,
    /// Sender contact, stored with the transfer
    #[schema(example = "sender@example.com")]
    pub sender_email: Option<String>,
    /// Recipient contact, stored with the transfer
    #[schema(example = "receiver@example.com")]
    pub receiver_email: Option<String>,
}

/// Contact fields collected from the upload form
#[derive(Debug, Default, Validate)]
pub struct TransferContactsDto {
    #[validate(email(message = "sender_email must be a valid email address"))]
    pub sender_email: Option<String>,
    #[validate(email(message = "receiver_email must be a valid email address"))]
    pub receiver_email: Option<String>,
}

/// Response DTO for a newly created transfer
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransferCreatedDto {
    /// Transfer identifier; also the secret part of the share link
    pub id: Uuid,
    /// Name the file will be downloaded as
    pub filename: String,
    /// Size of the stored file in bytes
    pub size_bytes: i64,
    pub expires_at: DateTime<Utc>,
    /// Link to hand to the recipient
    pub share_url: String,
}

impl TransferCreatedDto {
    pub fn new(transfer: &Transfer, public_base_url: &str) -> Self {
        Self {
            id: transfer.id,
            filename: transfer.download_name(),
            size_bytes: transfer.content_length,
            expires_at: transfer.expires_at,
            share_url: format!("{}/file/{}", public_base_url.trim_end_matches('/'), transfer.id),
        }
    }
}

/// Response DTO for transfer metadata
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransferResponseDto {
    pub id: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    /// Whether the file is served inside a zip archive
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Seconds left before the link stops working
    pub remaining_seconds: i64,
    /// Completed downloads so far
    pub download_count: i64,
}

impl TransferResponseDto {
    pub fn new(transfer: Transfer, now: DateTime<Utc>) -> Self {
        Self {
            id: transfer.id,
            filename: transfer.download_name(),
            size_bytes: transfer.content_length,
            archived: transfer.archived,
            created_at: transfer.created_at,
            remaining_seconds: transfer.remaining_seconds(now),
            expires_at: transfer.expires_at,
            download_count: transfer.download_count,
        }
    }
}
