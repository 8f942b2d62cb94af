//! Capability URL issuance

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use lnp_common::time;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use super::actor::CurrentActor;
use super::notes::{ensure_can_view, load_note};
use crate::db;
use crate::services::upload_pipeline::staging_prefix;
use crate::models::Area;
use crate::services::SignedUrl;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct UploadUrlResponse {
    #[serde(flatten)]
    pub signed: SignedUrl,
    /// Pass to `POST /notes/upload-staged` once the transfer is done
    pub staged_path: String,
}

/// POST /signed-urls/upload
pub async fn issue_upload_url(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Json<UploadUrlResponse>> {
    if !actor.can_access_area(Area::TeacherPortal) {
        return Err(ApiError::Forbidden("only teachers can upload lesson notes".to_string()));
    }

    let staged_path = format!("{}{}", staging_prefix(actor.id), Uuid::new_v4());
    let signed = state.signer.issue_upload_url(
        &staged_path,
        Duration::from_secs(state.config.upload_url_ttl_secs),
        time::now(),
    )?;
    Ok(Json(UploadUrlResponse { signed, staged_path }))
}

/// POST /versions/:id/download-url
pub async fn issue_download_url(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(version_id): Path<Uuid>,
) -> ApiResult<Json<SignedUrl>> {
    let version = db::notes::get_version(&state.db, version_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("version {} not found", version_id)))?;
    let note = load_note(&state, version.lesson_note_id).await?;
    ensure_can_view(&actor, &note)?;

    let signed = state.signer.issue_download_url_for_version(
        &version,
        Duration::from_secs(state.config.download_url_ttl_secs),
        time::now(),
    )?;
    Ok(Json(signed))
}

pub fn signed_url_routes() -> Router<AppState> {
    Router::new()
        .route("/signed-urls/upload", post(issue_upload_url))
        .route("/versions/:id/download-url", post(issue_download_url))
}
