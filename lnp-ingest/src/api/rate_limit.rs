//! Per-route API rate limit middleware
//!
//! Counts every request on a protected route against the caller's
//! per-minute quota for that route. Requests without an actor pass through;
//! the handler's extractor refuses them.

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use lnp_common::time;

use super::actor::actor_from_headers;
use crate::services::RateAction;
use crate::AppState;

pub async fn api_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(actor) = actor_from_headers(request.headers()) else {
        return next.run(request).await;
    };

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let action = RateAction::Api {
        route: format!("{} {}", request.method(), path),
    };

    match state.rate_limiter.hit(&actor, &action, time::now()).await {
        Ok(_) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
