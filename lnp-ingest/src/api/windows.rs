//! Submission window endpoints

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use lnp_common::time;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actor::CurrentActor;
use super::{academic_context, week};
use crate::db::windows::WindowSchedule;
use crate::models::SubmissionWindow;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct UpsertWindowRequest {
    pub session_id: i64,
    pub term: i64,
    pub week: i64,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub is_open: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct WindowStatusParams {
    pub session: i64,
    pub term: i64,
    pub week: i64,
}

#[derive(Debug, Deserialize)]
pub struct WindowListParams {
    pub session: i64,
    pub term: i64,
}

#[derive(Debug, Serialize)]
pub struct WindowStatus {
    pub open: bool,
    pub window: Option<SubmissionWindow>,
}

/// PUT /windows
pub async fn upsert_window(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<UpsertWindowRequest>,
) -> ApiResult<Json<SubmissionWindow>> {
    let ctx = academic_context(request.session_id, request.term)?;
    let schedule = WindowSchedule {
        session_id: ctx.session_id,
        term: ctx.term,
        week: week(request.week)?,
        opens_at: request.opens_at,
        closes_at: request.closes_at,
        is_open: request.is_open,
    };
    let window = state.windows.upsert_window(&schedule, &actor, time::now()).await?;
    Ok(Json(window))
}

/// POST /windows/:id/toggle
pub async fn toggle_window(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubmissionWindow>> {
    Ok(Json(state.windows.toggle(id, &actor, time::now()).await?))
}

/// GET /windows/status
pub async fn window_status(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
    Query(params): Query<WindowStatusParams>,
) -> ApiResult<Json<WindowStatus>> {
    let ctx = academic_context(params.session, params.term)?;
    let week = week(params.week)?;
    let now = time::now();

    let window = state.windows.window(ctx.session_id, ctx.term, week).await?;
    Ok(Json(WindowStatus {
        open: window.as_ref().map(|w| w.accepts_uploads_at(now)).unwrap_or(false),
        window,
    }))
}

/// GET /windows
pub async fn list_windows(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
    Query(params): Query<WindowListParams>,
) -> ApiResult<Json<Vec<SubmissionWindow>>> {
    let ctx = academic_context(params.session, params.term)?;
    Ok(Json(state.windows.list_for_term(ctx.session_id, ctx.term).await?))
}

pub fn window_routes() -> Router<AppState> {
    Router::new()
        .route("/windows", get(list_windows).put(upsert_window))
        .route("/windows/status", get(window_status))
        .route("/windows/:id/toggle", post(toggle_window))
}
