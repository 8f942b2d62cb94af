//! Submission window gate
//!
//! A slot accepts uploads iff its window exists, the manual flag is on, and
//! `opens_at <= now <= closes_at`.

use chrono::{DateTime, Utc};
use lnp_common::events::{EventBus, LnpEvent};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::audit_logger::AuditLogger;
use super::authority::conflict_or;
use super::cache::CacheLayer;
use crate::db;
use crate::db::windows::WindowSchedule;
use crate::error::{ApiError, ApiResult};
use crate::models::{Actor, Area, SubmissionWindow, Term, Week};

pub struct SubmissionWindowGate {
    pool: SqlitePool,
    cache: Arc<CacheLayer>,
    audit: AuditLogger,
    events: EventBus,
}

impl SubmissionWindowGate {
    pub fn new(pool: SqlitePool, cache: Arc<CacheLayer>, audit: AuditLogger, events: EventBus) -> Self {
        Self {
            pool,
            cache,
            audit,
            events,
        }
    }

    pub async fn is_open(&self, session_id: i64, term: Term, week: Week, now: DateTime<Utc>) -> ApiResult<bool> {
        Ok(self
            .cache
            .window(session_id, term, week)
            .await?
            .map(|w| w.accepts_uploads_at(now))
            .unwrap_or(false))
    }

    pub async fn window(&self, session_id: i64, term: Term, week: Week) -> ApiResult<Option<SubmissionWindow>> {
        self.cache.window(session_id, term, week).await
    }

    pub async fn list_for_term(&self, session_id: i64, term: Term) -> ApiResult<Vec<SubmissionWindow>> {
        Ok(db::windows::list_for_term(&self.pool, session_id, term).await?)
    }

    /// Flip the manual flag of `window_id`
    pub async fn toggle(&self, window_id: Uuid, actor: &Actor, now: DateTime<Utc>) -> ApiResult<SubmissionWindow> {
        if !actor.can_access_area(Area::WindowManagement) {
            return Err(ApiError::Forbidden("only administrators manage submission windows".to_string()));
        }

        let window = db::windows::toggle(&self.pool, window_id, actor.id, now)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("submission window {} not found", window_id)))?;

        self.cache
            .invalidate_window(window.session_id, window.term, window.week)
            .await;

        info!(
            window_id = %window.id,
            session_id = window.session_id,
            term = %window.term,
            week = %window.week,
            is_open = window.is_open,
            actor_id = actor.id,
            "Submission window toggled"
        );
        self.events.emit_lossy(LnpEvent::WindowToggled {
            window_id: window.id,
            is_open: window.is_open,
            actor_id: actor.id,
            timestamp: now,
        });
        self.audit
            .append(
                "submission_window",
                &window.id.to_string(),
                if window.is_open { "opened" } else { "closed" },
                Some(actor.id),
                json!({ "session_id": window.session_id, "term": window.term, "week": window.week }),
            )
            .await;

        Ok(window)
    }

    /// Define or reschedule the window for a (session, term, week)
    pub async fn upsert_window(
        &self,
        schedule: &WindowSchedule,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> ApiResult<SubmissionWindow> {
        if !actor.can_access_area(Area::WindowManagement) {
            return Err(ApiError::Forbidden("only administrators manage submission windows".to_string()));
        }
        if schedule.closes_at < schedule.opens_at {
            return Err(ApiError::BadRequest("closes_at must not be before opens_at".to_string()));
        }

        let window = db::windows::upsert(&self.pool, schedule, actor.id, now)
            .await
            .map_err(|e| conflict_or(e, "submission window"))?;

        self.cache
            .invalidate_window(window.session_id, window.term, window.week)
            .await;

        info!(
            window_id = %window.id,
            session_id = window.session_id,
            term = %window.term,
            week = %window.week,
            "Submission window scheduled"
        );
        self.audit
            .append(
                "submission_window",
                &window.id.to_string(),
                "scheduled",
                Some(actor.id),
                json!({
                    "opens_at": window.opens_at,
                    "closes_at": window.closes_at,
                    "is_open": window.is_open,
                }),
            )
            .await;

        Ok(window)
    }
}
