//! lnp-ingest library interface
//!
//! Exposes the services and router for the binary and integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use lnp_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::IngestConfig;
use crate::services::{
    AssignmentAuthority, AuditLogger, CacheLayer, CacheStore, FileStorage, PipelineJobHandler,
    PipelineLimits, RateLimiter, RetryableJobQueue, ReviewStateMachine, SignedUrlIssuer,
    SubmissionWindowGate, UploadPipeline, VirusScanner,
};

/// Lock-wait budget when the settings row is missing
const DEFAULT_LOCK_WAIT_MS: u64 = 5000;

/// External collaborators, swapped for test doubles in integration tests
pub struct Backends {
    /// Authoritative object store (usually primary + fallback)
    pub storage: Arc<dyn FileStorage>,
    /// Published copies for downloaders
    pub mirror: Arc<dyn FileStorage>,
    pub scanner: Arc<dyn VirusScanner>,
    pub cache: Arc<dyn CacheStore>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub config: Arc<IngestConfig>,
    pub authority: Arc<AssignmentAuthority>,
    pub windows: Arc<SubmissionWindowGate>,
    pub pipeline: Arc<UploadPipeline>,
    pub review: Arc<ReviewStateMachine>,
    pub rate_limiter: RateLimiter,
    pub signer: Arc<SignedUrlIssuer>,
    pub storage: Arc<dyn FileStorage>,
    pub mirror: Arc<dyn FileStorage>,
    pub jobs: Arc<RetryableJobQueue>,
    pub audit: AuditLogger,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Build every service on top of an initialized database
    pub async fn wire(
        db: SqlitePool,
        event_bus: EventBus,
        config: IngestConfig,
        backends: Backends,
    ) -> ApiResult<Self> {
        let lock_wait_ms = lnp_common::db::init::get_setting_i64(&db, "database_max_lock_wait_ms")
            .await?
            .and_then(|ms| u64::try_from(ms).ok())
            .unwrap_or(DEFAULT_LOCK_WAIT_MS);

        let audit = AuditLogger::new(db.clone(), event_bus.clone());
        let cache = Arc::new(CacheLayer::new(backends.cache, db.clone()));
        let rate_limiter = RateLimiter::new(db.clone(), config.rate_limits);

        let authority = Arc::new(AssignmentAuthority::new(db.clone(), cache.clone(), audit.clone()));
        let windows = Arc::new(SubmissionWindowGate::new(
            db.clone(),
            cache,
            audit.clone(),
            event_bus.clone(),
        ));

        let handler = Arc::new(PipelineJobHandler::new(
            db.clone(),
            backends.storage.clone(),
            backends.mirror.clone(),
            audit.clone(),
            event_bus.clone(),
        ));
        let jobs = Arc::new(RetryableJobQueue::new(db.clone(), handler, event_bus.clone()));

        let pipeline = Arc::new(UploadPipeline::new(
            db.clone(),
            authority.clone(),
            windows.clone(),
            rate_limiter.clone(),
            backends.scanner,
            backends.storage.clone(),
            jobs.clone(),
            event_bus.clone(),
            PipelineLimits {
                max_upload_bytes: config.max_upload_bytes,
                scan_timeout: config.scanner_timeout(),
                lock_wait_ms,
            },
        ));
        let review = Arc::new(ReviewStateMachine::new(
            db.clone(),
            rate_limiter.clone(),
            jobs.clone(),
            event_bus.clone(),
        ));
        let signer = Arc::new(SignedUrlIssuer::new(
            config.signing_secret.as_bytes().to_vec(),
            &config.public_base_url,
        ));

        Ok(Self {
            db,
            event_bus,
            config: Arc::new(config),
            authority,
            windows,
            pipeline,
            review,
            rate_limiter,
            signer,
            storage: backends.storage,
            mirror: backends.mirror,
            jobs,
            audit,
            startup_time: Utc::now(),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    // Room for an oversized upload to reach the size gate and be refused there
    let body_limit = (state.config.max_upload_bytes as usize).saturating_mul(2);

    let protected = Router::new()
        .merge(api::note_routes())
        .merge(api::window_routes())
        .merge(api::assignment_routes())
        .merge(api::signed_url_routes())
        .merge(api::job_routes())
        .merge(api::audit_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::rate_limit::api_rate_limit,
        ));

    Router::new()
        .merge(protected)
        // Capability routes: the signature is the credential
        .merge(api::file_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
