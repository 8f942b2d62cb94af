//! Bearer file transfer
//!
//! Whoever holds a valid capability URL may perform its one action on its
//! one path until it expires. Uploads only ever land in the staging area;
//! committed objects are written by the pipeline alone.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use lnp_common::time;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::upload_body::UploadBody;
use crate::services::UrlAction;
use crate::{ApiError, ApiResult, AppState};

const STAGING_ROOT: &str = "staging/";

#[derive(Debug, Deserialize)]
pub struct CapabilityParams {
    pub path: String,
    pub expires: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct StagedFile {
    pub path: String,
    pub size: usize,
}

/// PUT /files/upload
pub async fn upload_file(
    State(state): State<AppState>,
    Query(params): Query<CapabilityParams>,
    UploadBody(body): UploadBody,
) -> ApiResult<(StatusCode, Json<StagedFile>)> {
    let capability = state.signer.verify(
        UrlAction::Upload,
        &params.path,
        &params.expires,
        &params.signature,
        time::now(),
    )?;

    if !capability.path.starts_with(STAGING_ROOT) {
        return Err(ApiError::Forbidden("uploads are only accepted into staging".to_string()));
    }
    if body.len() as u64 > state.config.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge(state.pipeline.size_limit_message()));
    }

    state.storage.put(&capability.path, &body).await?;
    info!(path = %capability.path, size = body.len(), "Staged upload stored");

    Ok((
        StatusCode::CREATED,
        Json(StagedFile {
            path: capability.path,
            size: body.len(),
        }),
    ))
}

/// GET /files/download
///
/// Served from the published mirror when present, else from storage.
pub async fn download_file(
    State(state): State<AppState>,
    Query(params): Query<CapabilityParams>,
) -> ApiResult<Response> {
    let capability = state.signer.verify(
        UrlAction::Download,
        &params.path,
        &params.expires,
        &params.signature,
        time::now(),
    )?;

    let bytes = match state.mirror.get(&capability.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %capability.path, error = %e, "Mirror miss, reading storage");
            state.storage.get(&capability.path).await?
        }
    };

    Ok((
        [(header::CONTENT_TYPE, content_type_for(&capability.path))],
        bytes,
    )
        .into_response())
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "doc" => "application/msword",
        Some(ext) if ext == "docx" => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some(ext) if ext == "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/files/upload", put(upload_file))
        .route("/files/download", get(download_file))
}
