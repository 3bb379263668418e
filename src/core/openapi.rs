use utoipa::{Modify, OpenApi};

use crate::features::transfers::{dtos as transfers_dtos, handlers as transfers_handlers};
use crate::shared::types::ApiResponse;

#[derive(OpenApi)]
#[openapi(
    paths(
        // Transfers
        transfers_handlers::upload_transfer,
        transfers_handlers::get_transfer,
        transfers_handlers::download_transfer,
    ),
    components(
        schemas(
            // Transfers
            transfers_dtos::UploadTransferDto,
            transfers_dtos::TransferCreatedDto,
            transfers_dtos::TransferResponseDto,
            ApiResponse<transfers_dtos::TransferCreatedDto>,
            ApiResponse<transfers_dtos::TransferResponseDto>,
        )
    ),
    tags(
        (name = "transfers", description = "Time-boxed file transfers"),
    ),
    info(
        title = "Fileferry API",
        version = "0.1.0",
        description = "API documentation for Fileferry",
    )
)]
pub struct ApiDoc;

/// Modifier to override OpenAPI info from config
pub struct SwaggerInfoModifier {
    pub title: String,
    pub version: String,
    pub description: String,
}

impl Modify for SwaggerInfoModifier {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.info.title = self.title.clone();
        openapi.info.version = self.version.clone();
        openapi.info.description = Some(self.description.clone());
    }
}
