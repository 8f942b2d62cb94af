//! Lesson note endpoints: upload, read, review

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lnp_common::time;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actor::CurrentActor;
use super::upload_body::UploadBody;
use super::{academic_context, week};
use crate::db;
use crate::db::notes::NoteFilter;
use crate::models::{Actor, Area, LessonNote, LessonNoteVersion, NoteStatus};
use crate::services::review::{editable, BulkApproveReport, ReviewOutcome};
use crate::services::{UploadOutcome, UploadRequest, UploadTarget};
use crate::{ApiError, ApiResult, AppState};

/// Slot coordinates of an upload
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub session: i64,
    pub term: i64,
    pub week: i64,
    pub subject: i64,
    pub classroom: i64,
    pub filename: String,
}

impl UploadParams {
    fn target(&self) -> ApiResult<UploadTarget> {
        Ok(UploadTarget {
            subject_id: self.subject,
            classroom_id: self.classroom,
            context: academic_context(self.session, self.term)?,
            week: week(self.week)?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StagedUploadRequest {
    #[serde(flatten)]
    pub params: UploadParams,
    pub staged_path: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct NoteListParams {
    pub status: Option<String>,
    pub teacher: Option<i64>,
    pub session: Option<i64>,
    pub term: Option<i64>,
    pub week: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NoteView {
    #[serde(flatten)]
    pub note: LessonNote,
    pub editable: bool,
    pub current_version: Option<LessonNoteVersion>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApproveRequest {
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub comment: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkApproveRequest {
    pub note_ids: Vec<Uuid>,
}

/// Admins see every note; a teacher only their own
pub(crate) fn ensure_can_view(actor: &Actor, note: &LessonNote) -> ApiResult<()> {
    if actor.can_access_area(Area::ReviewQueue) || note.slot.teacher_id == actor.id {
        Ok(())
    } else {
        Err(ApiError::Forbidden("this lesson note belongs to another teacher".to_string()))
    }
}

pub(crate) async fn load_note(state: &AppState, id: Uuid) -> ApiResult<LessonNote> {
    db::notes::get_note(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("lesson note {} not found", id)))
}

/// POST /notes/upload
///
/// Raw file bytes in the body; slot coordinates and file name in the query.
pub async fn upload_note(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(params): Query<UploadParams>,
    UploadBody(body): UploadBody,
) -> ApiResult<(StatusCode, Json<UploadOutcome>)> {
    let request = UploadRequest {
        actor,
        target: params.target()?,
        file_name: params.filename,
        bytes: body.to_vec(),
    };
    let outcome = state.pipeline.upload(request, time::now()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /notes/upload-staged
///
/// Runs the pipeline on bytes previously sent to a signed upload URL.
pub async fn upload_staged_note(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<StagedUploadRequest>,
) -> ApiResult<(StatusCode, Json<UploadOutcome>)> {
    let target = request.params.target()?;
    let outcome = state
        .pipeline
        .upload_staged(
            actor,
            target,
            &request.staged_path,
            request.params.filename,
            time::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /notes
///
/// Review queue for admins; teachers are pinned to their own notes.
pub async fn list_notes(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(params): Query<NoteListParams>,
) -> ApiResult<Json<Vec<LessonNote>>> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<NoteStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let teacher_id = if actor.can_access_area(Area::ReviewQueue) {
        params.teacher
    } else {
        Some(actor.id)
    };

    let filter = NoteFilter {
        status,
        teacher_id,
        session_id: params.session,
        term: params.term,
        week: params.week,
        limit: params.limit,
    };
    Ok(Json(db::notes::list_notes(&state.db, &filter).await?))
}

/// GET /notes/:id
pub async fn get_note(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NoteView>> {
    let note = load_note(&state, id).await?;
    ensure_can_view(&actor, &note)?;

    let current_version = match note.current_version_id {
        Some(version_id) => db::notes::get_version(&state.db, version_id).await?,
        None => None,
    };

    Ok(Json(NoteView {
        editable: editable(&note),
        note,
        current_version,
    }))
}

/// GET /notes/:id/versions
pub async fn list_versions(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LessonNoteVersion>>> {
    let note = load_note(&state, id).await?;
    ensure_can_view(&actor, &note)?;
    Ok(Json(db::notes::list_versions(&state.db, id).await?))
}

/// POST /notes/:id/approve
pub async fn approve_note(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<Json<ReviewOutcome>> {
    let outcome = state
        .review
        .approve(id, request.comment.as_deref(), &actor, time::now())
        .await?;
    Ok(Json(outcome))
}

/// POST /notes/:id/reject
pub async fn reject_note(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<Json<ReviewOutcome>> {
    let outcome = state.review.reject(id, &request.comment, &actor, time::now()).await?;
    Ok(Json(outcome))
}

/// POST /notes/bulk-approve
pub async fn bulk_approve(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<BulkApproveRequest>,
) -> ApiResult<Json<BulkApproveReport>> {
    let report = state
        .review
        .bulk_approve(&request.note_ids, &actor, time::now())
        .await?;
    Ok(Json(report))
}

pub fn note_routes() -> Router<AppState> {
    Router::new()
        .route("/notes", get(list_notes))
        .route("/notes/upload", post(upload_note))
        .route("/notes/upload-staged", post(upload_staged_note))
        .route("/notes/bulk-approve", post(bulk_approve))
        .route("/notes/:id", get(get_note))
        .route("/notes/:id/versions", get(list_versions))
        .route("/notes/:id/approve", post(approve_note))
        .route("/notes/:id/reject", post(reject_note))
}
