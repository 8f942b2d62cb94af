//! Audit trail read endpoint

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use super::actor::CurrentActor;
use crate::models::{Area, AuditLogEntry};
use crate::{ApiError, ApiResult, AppState};

/// GET /audit/:subject_type/:subject_id
pub async fn audit_trail(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((subject_type, subject_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<AuditLogEntry>>> {
    if !actor.can_access_area(Area::ReviewQueue) {
        return Err(ApiError::Forbidden("only administrators read the audit log".to_string()));
    }
    Ok(Json(state.audit.entries_for(&subject_type, &subject_id).await?))
}

pub fn audit_routes() -> Router<AppState> {
    Router::new().route("/audit/:subject_type/:subject_id", get(audit_trail))
}
