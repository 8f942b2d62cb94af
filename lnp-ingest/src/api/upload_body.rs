//! Raw upload body extractor
//!
//! The router caps buffered bodies above the upload limit. A body that
//! overflows that cap is answered with the same size-gate error the
//! pipeline gives, not axum's plain-text rejection.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
};

use crate::{ApiError, AppState};

/// Buffered request body of a file transfer
pub struct UploadBody(pub Bytes);

#[async_trait]
impl FromRequest<AppState> for UploadBody {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        match Bytes::from_request(req, state).await {
            Ok(bytes) => Ok(UploadBody(bytes)),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                Err(ApiError::PayloadTooLarge(state.pipeline.size_limit_message()))
            }
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}
