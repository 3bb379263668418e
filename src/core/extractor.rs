use axum::{
    body::Body,
    extract::{FromRequest, Multipart, Request},
};

use crate::core::error::AppError;

/// Multipart extractor that reports a malformed or missing form body
/// through the standard error envelope
pub struct AppMultipart(pub Multipart);

impl<S> FromRequest<S> for AppMultipart
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        Multipart::from_request(req, state)
            .await
            .map(Self)
            .map_err(|rejection| {
                AppError::BadRequest(format!(
                    "Expected a multipart/form-data body: {}",
                    rejection.body_text()
                ))
            })
    }
}
