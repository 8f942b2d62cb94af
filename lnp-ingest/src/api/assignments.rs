//! Teaching assignment endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::actor::CurrentActor;
use super::academic_context;
use crate::models::{ActiveAssignments, Area, ClassTeacherAssignment, TeacherSubjectAssignment};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SubjectAssignmentRequest {
    pub teacher_id: i64,
    pub subject_id: i64,
    pub classroom_id: i64,
    pub session_id: i64,
    pub term: i64,
}

#[derive(Debug, Deserialize)]
pub struct ClassAssignmentRequest {
    pub teacher_id: i64,
    pub classroom_id: i64,
    pub session_id: i64,
}

/// POST /assignments/subject
pub async fn assign_subject(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<SubjectAssignmentRequest>,
) -> ApiResult<(StatusCode, Json<TeacherSubjectAssignment>)> {
    let ctx = academic_context(request.session_id, request.term)?;
    let assignment = state
        .authority
        .assign_subject_teacher(&actor, request.teacher_id, request.subject_id, request.classroom_id, ctx)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// DELETE /assignments/subject
pub async fn unassign_subject(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<SubjectAssignmentRequest>,
) -> ApiResult<StatusCode> {
    let ctx = academic_context(request.session_id, request.term)?;
    state
        .authority
        .remove_subject_assignment(
            &actor,
            request.teacher_id,
            request.subject_id,
            request.classroom_id,
            ctx.session_id,
            ctx.term,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /assignments/class
pub async fn assign_class(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<ClassAssignmentRequest>,
) -> ApiResult<(StatusCode, Json<ClassTeacherAssignment>)> {
    let assignment = state
        .authority
        .assign_class_teacher(&actor, request.teacher_id, request.classroom_id, request.session_id)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// DELETE /assignments/class
pub async fn unassign_class(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<ClassAssignmentRequest>,
) -> ApiResult<StatusCode> {
    state
        .authority
        .remove_class_assignment(&actor, request.teacher_id, request.classroom_id, request.session_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /assignments/:teacher_id
pub async fn teacher_assignments(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(teacher_id): Path<i64>,
) -> ApiResult<Json<ActiveAssignments>> {
    if actor.id != teacher_id && !actor.can_access_area(Area::AssignmentManagement) {
        return Err(ApiError::Forbidden("cannot view another teacher's assignments".to_string()));
    }
    Ok(Json(state.authority.active_assignments(teacher_id).await?))
}

pub fn assignment_routes() -> Router<AppState> {
    Router::new()
        .route("/assignments/subject", post(assign_subject).delete(unassign_subject))
        .route("/assignments/class", post(assign_class).delete(unassign_class))
        .route("/assignments/:teacher_id", get(teacher_assignments))
}
