//! Per-actor fixed-window rate limiting
//!
//! Counters live in SQLite so every process sees the same totals. `check`
//! reads, `increment` is one atomic UPSERT; `hit` does both without a
//! transaction between them, so concurrent requests may overshoot a limit
//! slightly. The limits are advisory.

use chrono::{DateTime, Utc};
use lnp_common::time::fixed_window_start;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::Actor;

const HOUR: i64 = 3600;
const MINUTE: i64 = 60;

/// What is being rate limited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateAction {
    Upload,
    Review,
    /// Generic API call, counted per route
    Api { route: String },
}

impl RateAction {
    fn bucket(&self, actor_id: i64) -> String {
        match self {
            RateAction::Upload => format!("upload:{}", actor_id),
            RateAction::Review => format!("review:{}", actor_id),
            RateAction::Api { route } => format!("api:{}:{}", actor_id, route),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the current window ends
    pub resets_at: i64,
}

impl RateDecision {
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.resets_at - now.timestamp()).max(0)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    pool: SqlitePool,
    limits: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(pool: SqlitePool, limits: RateLimitConfig) -> Self {
        Self { pool, limits }
    }

    fn policy(&self, action: &RateAction) -> (u32, i64) {
        match action {
            RateAction::Upload => (self.limits.uploads_per_hour, HOUR),
            RateAction::Review => (self.limits.reviews_per_hour, HOUR),
            RateAction::Api { .. } => (self.limits.api_per_minute, MINUTE),
        }
    }

    /// Current standing without counting a hit
    pub async fn check(&self, actor: &Actor, action: &RateAction, now: DateTime<Utc>) -> ApiResult<RateDecision> {
        let (limit, window_secs) = self.policy(action);
        let window_start = fixed_window_start(now, window_secs);
        let hits = db::rate_limits::hits_in_window(&self.pool, &action.bucket(actor.id), window_start).await?;

        Ok(decision(limit, hits, window_start + window_secs))
    }

    /// Count one hit; returns the standing after it
    pub async fn increment(&self, actor: &Actor, action: &RateAction, now: DateTime<Utc>) -> ApiResult<RateDecision> {
        let (limit, window_secs) = self.policy(action);
        let window_start = fixed_window_start(now, window_secs);
        let hits = db::rate_limits::increment(&self.pool, &action.bucket(actor.id), window_start).await?;

        // After counting, the decision describes the next request
        Ok(decision(limit, hits, window_start + window_secs))
    }

    /// Check, then count the hit; `RateLimited` when the quota is spent
    pub async fn hit(&self, actor: &Actor, action: &RateAction, now: DateTime<Utc>) -> ApiResult<RateDecision> {
        let standing = self.check(actor, action, now).await?;
        if !standing.allowed {
            warn!(actor_id = actor.id, ?action, limit = standing.limit, "Rate limit exceeded");
            return Err(ApiError::RateLimited {
                message: format!(
                    "rate limit exceeded: {} requests allowed, retry in {}s",
                    standing.limit,
                    standing.retry_after_secs(now)
                ),
                retry_after_secs: standing.retry_after_secs(now),
            });
        }

        let after = self.increment(actor, action, now).await?;
        debug!(actor_id = actor.id, ?action, remaining = after.remaining, "Rate limit hit counted");
        Ok(after)
    }

    /// Drop counters from windows that ended more than an hour ago
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> ApiResult<u64> {
        Ok(db::rate_limits::purge_before(&self.pool, now.timestamp() - 2 * HOUR).await?)
    }
}

fn decision(limit: u32, hits: i64, resets_at: i64) -> RateDecision {
    let used = hits.max(0) as u64;
    RateDecision {
        allowed: used < limit as u64,
        limit,
        remaining: (limit as u64).saturating_sub(used) as u32,
        resets_at,
    }
}
