use axum::{
    body::Body,
    extract::{multipart::MultipartError, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{StreamExt, TryStreamExt};
use std::io;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use crate::core::error::AppError;
use crate::core::extractor::AppMultipart;
use crate::features::transfers::dtos::{
    TransferContactsDto, TransferCreatedDto, TransferResponseDto, UploadTransferDto,
    MULTIPART_OVERHEAD_BYTES,
};
use crate::features::transfers::routes::TransferState;
use crate::features::transfers::services::{SpooledUpload, UploadMetadata};
use crate::shared::types::ApiResponse;
use crate::shared::validation::ascii_filename_fallback;

fn multipart_error(e: MultipartError) -> AppError {
    debug!("Failed to read multipart field: {}", e);
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(format!("Failed to read multipart data: {}", e.body_text()))
    }
}

/// Ids that do not parse can never resolve, so they are reported as not found
fn parse_transfer_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(format!("Transfer {} not found", raw)))
}

fn content_disposition(filename: &str) -> Result<HeaderValue, AppError> {
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_filename_fallback(filename),
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value)
        .map_err(|e| AppError::Internal(format!("Invalid Content-Disposition header: {}", e)))
}

/// Upload a file and create a transfer
///
/// Accepts multipart/form-data with:
/// - `file`: The file to share (required, streamed to storage)
/// - `ttl_hours`: Requested lifetime in hours (optional, clamped)
/// - `sender_email` / `receiver_email`: Optional contacts
#[utoipa::path(
    post,
    path = "/api/transfers",
    tag = "transfers",
    request_body(
        content = UploadTransferDto,
        content_type = "multipart/form-data",
        description = "File upload form with optional lifetime and contact fields",
    ),
    responses(
        (status = 201, description = "Transfer created", body = ApiResponse<TransferCreatedDto>),
        (status = 400, description = "Missing file or invalid form field"),
        (status = 413, description = "File too large")
    )
)]
pub async fn upload_transfer(
    State(state): State<TransferState>,
    headers: HeaderMap,
    AppMultipart(mut multipart): AppMultipart,
) -> Result<(StatusCode, Json<ApiResponse<TransferCreatedDto>>), AppError> {
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    state
        .ingestion
        .check_declared_size(declared_length.map(|len| len.saturating_sub(MULTIPART_OVERHEAD_BYTES)))?;

    let mut upload: Option<(SpooledUpload, String)> = None;
    let mut ttl_hours: Option<i64> = None;
    let mut contacts = TransferContactsDto::default();

    // Form fields may come before or after the file part
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                if upload.is_some() {
                    return Err(AppError::BadRequest(
                        "Only one file can be uploaded per transfer".to_string(),
                    ));
                }

                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unnamed".to_string());

                let body = field.map_err(io::Error::other).boxed();
                let spooled = state.ingestion.receive(body).await?;
                debug!("Staged upload {} for '{}'", spooled.id(), file_name);
                upload = Some((spooled, file_name));
            }
            "ttl_hours" => {
                let text = field.text().await.map_err(multipart_error)?;
                let text = text.trim();
                if !text.is_empty() {
                    ttl_hours = Some(text.parse().map_err(|_| {
                        AppError::Validation("ttl_hours must be a whole number of hours".to_string())
                    })?);
                }
            }
            "sender_email" => {
                let text = field.text().await.map_err(multipart_error)?;
                contacts.sender_email = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            "receiver_email" => {
                let text = field.text().await.map_err(multipart_error)?;
                contacts.receiver_email = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            _ => {
                debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    contacts
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (spooled, original_name) =
        upload.ok_or_else(|| AppError::BadRequest("File is required".to_string()))?;

    let transfer = state
        .ingestion
        .register(
            spooled,
            UploadMetadata {
                original_name,
                ttl_hours,
                sender_ref: contacts.sender_email,
                recipient_ref: contacts.receiver_email,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            Some(TransferCreatedDto::new(&transfer, &state.public_base_url)),
            Some("Transfer created".to_string()),
        )),
    ))
}

/// Get transfer metadata
///
/// Does not count as a download.
#[utoipa::path(
    get,
    path = "/api/transfers/{id}",
    tag = "transfers",
    params(
        ("id" = String, Path, description = "Transfer ID")
    ),
    responses(
        (status = 200, description = "Transfer found", body = ApiResponse<TransferResponseDto>),
        (status = 404, description = "Transfer not found"),
        (status = 410, description = "Transfer expired")
    )
)]
pub async fn get_transfer(
    State(state): State<TransferState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TransferResponseDto>>, AppError> {
    let id = parse_transfer_id(&id)?;
    let transfer = state.retrieval.describe(id).await?;

    Ok(Json(ApiResponse::success(
        Some(TransferResponseDto::new(transfer, state.retrieval.now())),
        None,
    )))
}

/// Download the transferred file
///
/// Streams the stored bytes. The download is counted once the full body has been sent.
#[utoipa::path(
    get,
    path = "/api/transfers/{id}/download",
    tag = "transfers",
    params(
        ("id" = String, Path, description = "Transfer ID")
    ),
    responses(
        (status = 200, description = "File content", body = [u8], content_type = "application/octet-stream"),
        (status = 404, description = "Transfer not found"),
        (status = 410, description = "Transfer expired")
    )
)]
pub async fn download_transfer(
    State(state): State<TransferState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_transfer_id(&id)?;
    let download = state.retrieval.download(id).await?;
    let transfer = &download.transfer;

    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static(transfer.content_type()),
        ),
        (
            header::CONTENT_LENGTH,
            HeaderValue::from(transfer.content_length),
        ),
        (
            header::CONTENT_DISPOSITION,
            content_disposition(&transfer.download_name())?,
        ),
    ];

    Ok((headers, Body::from_stream(download.body)).into_response())
}
