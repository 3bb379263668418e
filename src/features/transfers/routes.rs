use axum::{extract::DefaultBodyLimit, routing::get, routing::post, Router};
use std::sync::Arc;

use crate::features::transfers::dtos::MULTIPART_OVERHEAD_BYTES;
use crate::features::transfers::handlers::{download_transfer, get_transfer, upload_transfer};
use crate::features::transfers::services::{IngestionService, RetrievalService};

/// Shared state for the transfer handlers
#[derive(Clone)]
pub struct TransferState {
    pub ingestion: Arc<IngestionService>,
    pub retrieval: Arc<RetrievalService>,
    /// Base URL share links are rendered against
    pub public_base_url: Arc<str>,
}

/// Create routes for the transfers feature
pub fn routes(state: TransferState) -> Router {
    // Allow body size up to the upload limit + buffer for multipart overhead
    let body_limit = state
        .ingestion
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/api/transfers",
            post(upload_transfer).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/transfers/{id}", get(get_transfer))
        .route("/api/transfers/{id}/download", get(download_transfer))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TransferPolicyConfig;
    use crate::features::transfers::registry::TransferRegistry;
    use crate::shared::test_helpers::TestHarness;
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use serde_json::Value;

    fn state_for(harness: &TestHarness) -> TransferState {
        TransferState {
            ingestion: Arc::new(harness.ingestion()),
            retrieval: Arc::new(harness.retrieval()),
            public_base_url: Arc::from("https://share.example.com"),
        }
    }

    fn server_for(harness: &TestHarness) -> TestServer {
        TestServer::new(routes(state_for(harness))).unwrap()
    }

    /// Served over a real socket, so bodies are polled the way hyper polls them
    fn http_server_for(harness: &TestHarness) -> TestServer {
        TestServer::builder()
            .http_transport()
            .build(routes(state_for(harness)))
            .unwrap()
    }

    fn note_form(ttl_hours: &str) -> MultipartForm {
        MultipartForm::new()
            .add_text("ttl_hours", ttl_hours)
            .add_part(
                "file",
                Part::bytes(b"0123456789".as_slice())
                    .file_name("note.txt")
                    .mime_type("text/plain"),
            )
    }

    async fn upload_note(server: &TestServer) -> String {
        let response = server.post("/api/transfers").multipart(note_form("1")).await;
        response.assert_status(StatusCode::CREATED);

        let body: Value = response.json();
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let harness = TestHarness::new().await;
        let server = http_server_for(&harness);

        let response = server.post("/api/transfers").multipart(note_form("1")).await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["filename"], "note.txt");
        assert_eq!(body["data"]["size_bytes"], 10);
        assert_eq!(
            body["data"]["share_url"],
            format!("https://share.example.com/file/{}", id)
        );

        let download = server.get(&format!("/api/transfers/{}/download", id)).await;
        download.assert_status_ok();
        assert_eq!(download.as_bytes().to_vec(), b"0123456789".to_vec());
        assert_eq!(download.header("content-length"), "10");
        assert_eq!(download.header("content-type"), "application/octet-stream");
        assert!(download
            .header("content-disposition")
            .to_str()
            .unwrap()
            .contains("filename*=UTF-8''note.txt"));

        let described = server.get(&format!("/api/transfers/{}", id)).await;
        described.assert_status_ok();
        let body: Value = described.json();
        assert_eq!(body["data"]["download_count"], 1);
        assert_eq!(body["data"]["remaining_seconds"], 3600);
    }

    #[tokio::test]
    async fn test_concurrent_downloads_are_counted_over_http() {
        let harness = TestHarness::new().await;
        let server = http_server_for(&harness);
        let id = upload_note(&server).await;
        let path = format!("/api/transfers/{}/download", id);

        let downloads =
            futures::future::join_all((0..50).map(|_| async { server.get(&path).await })).await;
        for download in downloads {
            download.assert_status_ok();
            assert_eq!(download.as_bytes().to_vec(), b"0123456789".to_vec());
        }

        let stored = harness.registry.get_by_id(id.parse().unwrap()).await.unwrap();
        assert_eq!(stored.download_count, 50);
    }

    #[tokio::test]
    async fn test_form_fields_after_file_part() {
        let harness = TestHarness::new().await;
        let server = server_for(&harness);

        let form = MultipartForm::new()
            .add_part("file", Part::bytes(b"late fields".as_slice()).file_name("a.txt"))
            .add_text("ttl_hours", "2")
            .add_text("sender_email", "sender@example.com");

        let response = server.post("/api/transfers").multipart(form).await;
        response.assert_status(StatusCode::CREATED);

        let body: Value = response.json();
        let id = body["data"]["id"].as_str().unwrap().parse().unwrap();
        let stored = harness.registry.get_by_id(id).await.unwrap();
        assert_eq!(stored.expires_at - stored.created_at, chrono::Duration::hours(2));
        assert_eq!(stored.sender_ref.as_deref(), Some("sender@example.com"));
    }

    #[tokio::test]
    async fn test_expired_link() {
        let harness = TestHarness::new().await;
        let server = server_for(&harness);
        let id = upload_note(&server).await;

        harness.clock.advance(chrono::Duration::minutes(61));

        server
            .get(&format!("/api/transfers/{}/download", id))
            .await
            .assert_status(StatusCode::GONE);
        server
            .get(&format!("/api/transfers/{}", id))
            .await
            .assert_status(StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_unknown_link() {
        let harness = TestHarness::new().await;
        let server = server_for(&harness);

        server
            .get("/api/transfers/nonexistent-id/download")
            .await
            .assert_status_not_found();
        server
            .get(&format!("/api/transfers/{}", uuid::Uuid::new_v4()))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn test_swept_link_is_not_found() {
        let harness = TestHarness::new().await;
        let server = server_for(&harness);
        let id = upload_note(&server).await;

        harness.clock.advance(chrono::Duration::minutes(61));
        let report = harness.sweeper().sweep_once().await;
        assert_eq!(report.expired_reclaimed, 1);
        assert_eq!(harness.blob_count(), 0);

        server
            .get(&format!("/api/transfers/{}", id))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let harness = TestHarness::new().await;
        let server = server_for(&harness);

        let form = MultipartForm::new().add_text("ttl_hours", "1");
        server
            .post("/api/transfers")
            .multipart(form)
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_non_multipart_body_uses_error_envelope() {
        let harness = TestHarness::new().await;
        let server = server_for(&harness);

        let response = server
            .post("/api/transfers")
            .json(&serde_json::json!({ "file": "nope" }))
            .await;

        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_invalid_fields_are_rejected() {
        let harness = TestHarness::new().await;
        let server = server_for(&harness);

        server
            .post("/api/transfers")
            .multipart(note_form("soon"))
            .await
            .assert_status_bad_request();

        let form = note_form("1").add_text("receiver_email", "nobody");
        server
            .post("/api/transfers")
            .multipart(form)
            .await
            .assert_status_bad_request();

        assert_eq!(harness.blob_count(), 0);
        assert_eq!(harness.spool_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let harness = TestHarness::with_policy(TransferPolicyConfig {
            max_upload_bytes: 4,
            ..Default::default()
        })
        .await;
        let server = server_for(&harness);

        server
            .post("/api/transfers")
            .multipart(note_form("1"))
            .await
            .assert_status(StatusCode::PAYLOAD_TOO_LARGE);

        assert_eq!(harness.blob_count(), 0);
        assert_eq!(harness.spool_count(), 0);
    }

    #[tokio::test]
    async fn test_archived_download_headers() {
        let harness = TestHarness::with_policy(TransferPolicyConfig {
            archive_uploads: true,
            ..Default::default()
        })
        .await;
        let server = server_for(&harness);
        let id = upload_note(&server).await;

        let download = server.get(&format!("/api/transfers/{}/download", id)).await;
        download.assert_status_ok();
        assert_eq!(download.header("content-type"), "application/zip");
        assert!(download
            .header("content-disposition")
            .to_str()
            .unwrap()
            .contains("filename=\"note.txt.zip\""));
    }
}
