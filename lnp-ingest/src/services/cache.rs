//! Read-through cache for window and assignment lookups
//!
//! The cache is an optimization only. Every write path that touches windows
//! or assignments calls the matching `invalidate_*`; the TTL merely bounds
//! memory. Backend failures degrade to direct queries.
//!
//! Window entries hold the window record, not the open/closed answer, so the
//! time-range half of the predicate is always evaluated against the caller's
//! `now`.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db;
use crate::error::ApiResult;
use crate::models::{ActiveAssignments, SubmissionWindow, Term, Week};

#[derive(Debug, Error)]
#[error("cache backend unavailable: {0}")]
pub struct CacheError(pub String);

/// Key/value backend holding JSON strings
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;
    async fn invalidate(&self, key: &str) -> Result<(), CacheError>;
}

/// In-process backend
pub struct MokaCacheStore {
    cache: moka::future::Cache<String, String>,
}

impl MokaCacheStore {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: moka::future::Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl CacheStore for MokaCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.cache.insert(key.to_string(), value).await;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}

fn window_key(session_id: i64, term: Term, week: Week) -> String {
    format!("window:{}:{}:{}", session_id, term, week)
}

fn assignments_key(teacher_id: i64) -> String {
    format!("assignments:{}", teacher_id)
}

pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    pool: SqlitePool,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, pool: SqlitePool) -> Self {
        Self { store, pool }
    }

    /// Window record for (session, term, week); `None` when undefined
    pub async fn window(&self, session_id: i64, term: Term, week: Week) -> ApiResult<Option<SubmissionWindow>> {
        let key = window_key(session_id, term, week);
        if let Some(hit) = self.lookup::<Option<SubmissionWindow>>(&key).await {
            return Ok(hit);
        }

        let window = db::windows::find_by_key(&self.pool, session_id, term, week).await?;
        self.fill(&key, &window).await;
        Ok(window)
    }

    /// Every grant the teacher holds
    pub async fn active_assignments(&self, teacher_id: i64) -> ApiResult<ActiveAssignments> {
        let key = assignments_key(teacher_id);
        if let Some(hit) = self.lookup::<ActiveAssignments>(&key).await {
            return Ok(hit);
        }

        let assignments = db::assignments::load_active(&self.pool, teacher_id).await?;
        self.fill(&key, &assignments).await;
        Ok(assignments)
    }

    pub async fn invalidate_window(&self, session_id: i64, term: Term, week: Week) {
        self.drop_key(&window_key(session_id, term, week)).await;
    }

    pub async fn invalidate_assignments(&self, teacher_id: i64) {
        self.drop_key(&assignments_key(teacher_id)).await;
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!(key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, falling back to database");
                None
            }
        }
    }

    async fn fill<T: Serialize>(&self, key: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "Cache entry not serializable");
                return;
            }
        };
        if let Err(e) = self.store.set(key, json).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    async fn drop_key(&self, key: &str) {
        if let Err(e) = self.store.invalidate(key).await {
            tracing::error!(key, error = %e, "Cache invalidation failed, entry may be stale until TTL");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use lnp_common::db::init_database;
    use tempfile::TempDir;

    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: String) -> Result<(), CacheError> {
            Err(CacheError("connection refused".into()))
        }
        async fn invalidate(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError("connection refused".into()))
        }
    }

    async fn pool() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("lnp.db")).await.unwrap();
        (dir, pool)
    }

    fn schedule(is_open: bool) -> db::windows::WindowSchedule {
        let now = Utc::now();
        db::windows::WindowSchedule {
            session_id: 2024,
            term: Term::First,
            week: Week::new(1).unwrap(),
            opens_at: now - ChronoDuration::days(1),
            closes_at: now + ChronoDuration::days(1),
            is_open: Some(is_open),
        }
    }

    #[tokio::test]
    async fn test_unavailable_backend_falls_back_to_database() {
        let (_dir, pool) = pool().await;
        db::windows::upsert(&pool, &schedule(true), 1, Utc::now()).await.unwrap();

        let cache = CacheLayer::new(Arc::new(DownStore), pool.clone());
        let window = cache
            .window(2024, Term::First, Week::new(1).unwrap())
            .await
            .unwrap();
        assert!(window.unwrap().is_open);

        // Invalidation against a dead backend must not panic or error
        cache.invalidate_assignments(7).await;
        assert!(cache.active_assignments(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidation_exposes_new_state() {
        let (_dir, pool) = pool().await;
        let window = db::windows::upsert(&pool, &schedule(true), 1, Utc::now()).await.unwrap();
        let cache = CacheLayer::new(
            Arc::new(MokaCacheStore::new(100, Duration::from_secs(3600))),
            pool.clone(),
        );
        let week = Week::new(1).unwrap();

        assert!(cache.window(2024, Term::First, week).await.unwrap().unwrap().is_open);

        db::windows::toggle(&pool, window.id, 1, Utc::now()).await.unwrap();
        // Still the cached record until invalidated
        assert!(cache.window(2024, Term::First, week).await.unwrap().unwrap().is_open);

        cache.invalidate_window(2024, Term::First, week).await;
        assert!(!cache.window(2024, Term::First, week).await.unwrap().unwrap().is_open);
    }

    #[tokio::test]
    async fn test_missing_window_is_cached_as_absent() {
        let (_dir, pool) = pool().await;
        let cache = CacheLayer::new(
            Arc::new(MokaCacheStore::new(100, Duration::from_secs(3600))),
            pool.clone(),
        );
        let week = Week::new(3).unwrap();
        assert!(cache.window(2024, Term::Second, week).await.unwrap().is_none());
    }
}
