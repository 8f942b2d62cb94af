//! Dead-letter operations

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use lnp_common::time;
use uuid::Uuid;

use super::actor::CurrentActor;
use crate::models::{Actor, Area, Job};
use crate::{ApiError, ApiResult, AppState};

fn require_operator(actor: &Actor) -> ApiResult<()> {
    if actor.can_access_area(Area::JobOperations) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("only administrators manage background jobs".to_string()))
    }
}

/// GET /jobs/dead
pub async fn dead_jobs(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Json<Vec<Job>>> {
    require_operator(&actor)?;
    Ok(Json(state.jobs.dead_letters().await?))
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    require_operator(&actor)?;
    Ok(Json(state.jobs.get(id).await?))
}

/// POST /jobs/:id/requeue
pub async fn requeue_job(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    require_operator(&actor)?;
    Ok(Json(state.jobs.requeue_dead(id, time::now()).await?))
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs/dead", get(dead_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/requeue", post(requeue_job))
}
