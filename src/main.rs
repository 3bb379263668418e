mod core;
mod features;
mod modules;
mod shared;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::{Config, StorageBackend};
use crate::core::openapi::{ApiDoc, SwaggerInfoModifier};
use crate::core::{database, middleware};
use crate::features::transfers::{
    routes as transfers_routes, InMemoryTransferRegistry, IngestionService, PgTransferRegistry,
    ReclamationSweeper, RetrievalService, TransferRegistry, TransferState,
};
use crate::modules::storage::{BlobStore, LocalBlobStore, MinIOBlobStore, SpoolDir};
use axum::{middleware::from_fn, Router};
use std::sync::Arc;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn main() -> anyhow::Result<()> {
    // Build Tokio runtime with configurable worker threads
    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .max_blocking_threads(worker_threads * 4)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(worker_threads))
}

async fn async_main(worker_threads: usize) -> anyhow::Result<()> {
    // Load .env file BEFORE initializing logger so RUST_LOG is available
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    // Log system info
    let available_cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    tracing::info!(
        "System info: available_cpus={}, tokio_worker_threads={}, pid={}",
        available_cpus,
        worker_threads,
        std::process::id()
    );

    tracing::info!("Configuration loaded successfully");

    // Transfer registry: Postgres when configured, in-memory otherwise
    let registry: Arc<dyn TransferRegistry> = match &config.database {
        Some(db_config) => {
            let pool = database::connect_and_migrate(db_config).await?;
            Arc::new(PgTransferRegistry::new(pool))
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set, using in-memory transfer registry (transfers are lost on restart)"
            );
            Arc::new(InMemoryTransferRegistry::new())
        }
    };

    // Blob storage backend
    let blob_store: Arc<dyn BlobStore> = match (&config.storage.backend, &config.storage.minio) {
        (StorageBackend::MinIO, Some(minio_config)) => {
            let store = MinIOBlobStore::new(minio_config.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize MinIO blob store: {}", e))?;
            tracing::info!("Blobs stored in MinIO bucket: {}", store.bucket_name());
            Arc::new(store)
        }
        (StorageBackend::MinIO, None) => {
            anyhow::bail!("STORAGE_BACKEND=minio requires MinIO configuration")
        }
        (StorageBackend::Local, _) => Arc::new(
            LocalBlobStore::new(config.storage.root.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize local blob store: {}", e))?,
        ),
    };

    let spool = Arc::new(
        SpoolDir::new(config.storage.spool_dir.clone())
            .map_err(|e| anyhow::anyhow!("Failed to initialize upload spool: {}", e))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Initialize transfer services
    let ingestion_service = Arc::new(IngestionService::new(
        Arc::clone(&blob_store),
        Arc::clone(&registry),
        Arc::clone(&spool),
        config.policy.clone(),
        Arc::clone(&clock),
    ));
    let retrieval_service = Arc::new(RetrievalService::new(
        Arc::clone(&blob_store),
        Arc::clone(&registry),
        Arc::clone(&clock),
    ));
    tracing::info!(
        "Transfer services initialized (max_upload_bytes={}, ttl_hours={}..={}, archive_uploads={})",
        config.policy.max_upload_bytes,
        config.policy.min_ttl_hours,
        config.policy.max_ttl_hours,
        config.policy.archive_uploads
    );

    // Spawn reclamation sweeper worker
    let sweeper = ReclamationSweeper::new(
        Arc::clone(&blob_store),
        Arc::clone(&registry),
        Arc::clone(&spool),
        Arc::clone(&clock),
        &config.policy,
    );
    tokio::spawn(async move {
        sweeper.run().await;
    });
    tracing::info!("Reclamation sweeper worker spawned");

    // Build application router with dynamic swagger config
    let swagger_modifier = SwaggerInfoModifier {
        title: config.swagger.title.clone(),
        version: config.swagger.version.clone(),
        description: config.swagger.description.clone(),
    };

    let mut openapi = ApiDoc::openapi();
    swagger_modifier.modify(&mut openapi);

    // Build swagger router
    let swagger = if let Some(credentials) = config.swagger.credentials() {
        tracing::info!("Swagger UI basic auth enabled");
        Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
            .layer(from_fn(middleware::basic_auth_middleware(Arc::new(
                credentials,
            ))))
    } else {
        tracing::info!("Swagger UI basic auth disabled (no credentials configured)");
        Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
    };

    // Simple health check endpoint
    async fn health_check() -> axum::http::StatusCode {
        axum::http::StatusCode::OK
    }

    // Connectivity probe used by clients before uploading
    async fn ping() -> &'static str {
        "connected"
    }

    let health_routes = Router::new()
        .route("/health", axum::routing::get(health_check))
        .route("/api/ping", axum::routing::get(ping));

    let transfer_routes = transfers_routes(TransferState {
        ingestion: ingestion_service,
        retrieval: retrieval_service,
        public_base_url: Arc::from(config.app.public_base_url.as_str()),
    });

    let app = Router::new()
        .merge(swagger)
        .merge(transfer_routes)
        .merge(health_routes)
        .layer(middleware::cors_layer(
            config.app.cors_allowed_origins.clone(),
        ))
        // Propagate X-Request-Id to response headers
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(middleware::MakeSpanWithRequestId)
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Generate X-Request-Id using UUID v7 (or use client-provided one)
        .layer(SetRequestIdLayer::x_request_id(middleware::MakeRequestUuid));

    // Start server
    let addr = config.app.server_address();
    let socket_addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

    // Use socket2 for TCP listener configuration
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(socket_addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nodelay(true)?;

    socket.set_recv_buffer_size(256 * 1024)?;
    socket.set_send_buffer_size(256 * 1024)?;

    #[cfg(target_os = "linux")]
    {
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(std::time::Duration::from_secs(60))
            .with_interval(std::time::Duration::from_secs(10))
            .with_retries(3);
        socket.set_tcp_keepalive(&keepalive)?;
    }
    #[cfg(not(target_os = "linux"))]
    {
        let keepalive = socket2::TcpKeepalive::new().with_time(std::time::Duration::from_secs(60));
        socket.set_tcp_keepalive(&keepalive)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(65535)?;

    let listener = tokio::net::TcpListener::from_std(socket.into())?;
    tracing::info!("Server listening on {}", format!("http://{}", addr));
    tracing::info!(
        "Swagger UI available at {}",
        format!("http://{}/swagger-ui/", addr)
    );

    axum::serve(listener, app).await?;

    Ok(())
}
