//! Retryable background jobs
//!
//! Side effects of a committed state change (mirror publishing,
//! notifications, audit appends) run here, never on the request path. A job
//! gets at most [`MAX_ATTEMPTS`] attempts. After a failed attempt `n` the
//! next one waits [`BACKOFF_SECS`]`[n - 1]`; a job that fails its last attempt
//! moves to `dead` and stays there until an operator requeues it.
//!
//! Delivery is at-least-once: a handler may see the same job twice (crash
//! or failed bookkeeping write between side effect and `mark_done`), so
//! handlers must be idempotent. Jobs are claimed one at a time under a
//! [`LEASE_SECS`] lease; a job whose outcome could not be recorded is
//! released when its lease expires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lnp_common::events::{EventBus, LnpEvent};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Job, JobPayload, JobStatus};

pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before the next attempt, indexed by failed attempt number - 1.
/// With three attempts only the first two entries are ever used; the last
/// applies if `MAX_ATTEMPTS` is raised.
pub const BACKOFF_SECS: [i64; 3] = [10, 30, 60];

/// How long a claimed job may stay `running` before it is presumed abandoned
pub const LEASE_SECS: i64 = 300;

pub fn backoff_secs(failed_attempt: u32) -> i64 {
    let idx = (failed_attempt.max(1) as usize - 1).min(BACKOFF_SECS.len() - 1);
    BACKOFF_SECS[idx]
}

#[derive(Debug, Error)]
pub enum JobError {
    /// Worth another attempt
    #[error("{0}")]
    Retryable(String),

    /// Will never succeed (missing entity, corrupt payload); dead-lettered at once
    #[error("{0}")]
    Permanent(String),
}

impl From<ApiError> for JobError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound(msg) => JobError::Permanent(msg),
            other => JobError::Retryable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// Outcome counts of one `run_due` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub done: usize,
    pub retried: usize,
    pub dead: usize,
    /// Abandoned claims returned to the queue
    pub released: usize,
    /// Attempts whose outcome could not be recorded
    pub unrecorded: usize,
}

pub struct RetryableJobQueue {
    pool: SqlitePool,
    handler: Arc<dyn JobHandler>,
    events: EventBus,
    max_attempts: u32,
}

impl RetryableJobQueue {
    pub fn new(pool: SqlitePool, handler: Arc<dyn JobHandler>, events: EventBus) -> Self {
        Self {
            pool,
            handler,
            events,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub async fn enqueue(&self, payload: JobPayload, now: DateTime<Utc>) -> ApiResult<Job> {
        let job = db::jobs::insert(&self.pool, &payload, self.max_attempts, now.timestamp(), now).await?;
        debug!(job_id = %job.id, kind = payload.kind(), "Job enqueued");
        Ok(job)
    }

    /// Run every job due at `now` once
    ///
    /// Only claiming can fail the pass. A failure to record one job's outcome
    /// is logged and leaves that job to lease expiry; the pass moves on.
    pub async fn run_due(&self, now: DateTime<Utc>) -> ApiResult<RunSummary> {
        let mut summary = RunSummary::default();

        let (released, expired) = db::jobs::release_expired_leases(&self.pool, now).await?;
        if released + expired > 0 {
            warn!(released, dead = expired, "Released jobs with expired leases");
        }
        summary.released = released as usize;
        summary.dead += expired as usize;

        let lease_until = now.timestamp() + LEASE_SECS;
        while let Some(job) = db::jobs::claim_next(&self.pool, now, lease_until).await? {
            let (job_id, kind) = (job.id, job.payload.kind());
            if let Err(e) = self.run_one(job, now, &mut summary).await {
                error!(job_id = %job_id, kind, error = %e, "Failed to record job outcome, left to lease expiry");
                summary.unrecorded += 1;
            }
        }

        Ok(summary)
    }

    async fn run_one(&self, job: Job, now: DateTime<Utc>, summary: &mut RunSummary) -> ApiResult<()> {
        let kind = job.payload.kind();
        debug!(job_id = %job.id, kind, attempt = job.attempts, "Running job");

        match self.handler.handle(&job).await {
            Ok(()) => {
                db::jobs::mark_done(&self.pool, job.id, now).await?;
                debug!(job_id = %job.id, kind, attempt = job.attempts, "Job done");
                summary.done += 1;
            }
            Err(JobError::Retryable(msg)) if job.attempts < job.max_attempts => {
                let delay = backoff_secs(job.attempts);
                db::jobs::schedule_retry(&self.pool, job.id, now.timestamp() + delay, &msg, now).await?;
                warn!(
                    job_id = %job.id,
                    kind,
                    attempt = job.attempts,
                    retry_in_secs = delay,
                    error = %msg,
                    "Job failed, retry scheduled"
                );
                summary.retried += 1;
            }
            Err(err) => {
                let msg = err.to_string();
                db::jobs::mark_dead(&self.pool, job.id, &msg, now).await?;
                error!(
                    job_id = %job.id,
                    kind,
                    attempt = job.attempts,
                    error = %msg,
                    "Job moved to dead letter"
                );
                self.events.emit_lossy(LnpEvent::JobDeadLettered {
                    job_id: job.id,
                    kind: kind.to_string(),
                    error: msg,
                    timestamp: now,
                });
                summary.dead += 1;
            }
        }
        Ok(())
    }

    pub async fn dead_letters(&self) -> ApiResult<Vec<Job>> {
        Ok(db::jobs::list_by_status(&self.pool, JobStatus::Dead).await?)
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<Job> {
        db::jobs::get(&self.pool, id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("job {} not found", id)))
    }

    /// Give a dead job a fresh set of attempts
    pub async fn requeue_dead(&self, id: Uuid, now: DateTime<Utc>) -> ApiResult<Job> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Dead {
            return Err(ApiError::PreconditionFailed(format!(
                "job {} is {}, only dead jobs can be requeued",
                id, job.status
            )));
        }
        db::jobs::requeue_dead(&self.pool, id, now).await?;
        info!(job_id = %id, kind = job.payload.kind(), "Dead job requeued");
        self.get(id).await
    }

    /// Poll for due jobs until `cancel` fires
    pub fn spawn_worker(self: Arc<Self>, poll_interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            match db::jobs::recover_running(&self.pool, lnp_common::time::now()).await {
                Ok(0) => {}
                Ok(n) => warn!(count = n, "Requeued jobs left running by a previous worker"),
                Err(e) => error!(error = %e, "Failed to recover running jobs"),
            }

            info!(poll_ms = poll_interval.as_millis() as u64, "Job worker started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }

                match self.run_due(lnp_common::time::now()).await {
                    Ok(summary) if summary != RunSummary::default() => {
                        debug!(?summary, "Job pass finished");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Job pass failed"),
                }
            }
            info!("Job worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use lnp_common::db::init_database;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Fails the first `failures` calls
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        async fn handle(&self, _job: &Job) -> Result<(), JobError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(JobError::Retryable(format!("failure {}", n + 1)))
            } else {
                Ok(())
            }
        }
    }

    struct Doomed;

    #[async_trait]
    impl JobHandler for Doomed {
        async fn handle(&self, _job: &Job) -> Result<(), JobError> {
            Err(JobError::Permanent("version vanished".into()))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 16, 9, 0, 0).unwrap()
    }

    fn payload() -> JobPayload {
        JobPayload::AuditAppend {
            subject_type: "lesson_note".into(),
            subject_id: "n1".into(),
            action: "uploaded".into(),
            actor_id: Some(1),
            details: serde_json::json!({}),
        }
    }

    async fn queue(handler: Arc<dyn JobHandler>) -> (TempDir, RetryableJobQueue) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("lnp.db")).await.unwrap();
        (dir, RetryableJobQueue::new(pool, handler, EventBus::new(16)))
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_secs(1), 10);
        assert_eq!(backoff_secs(2), 30);
        assert_eq!(backoff_secs(3), 60);
        assert_eq!(backoff_secs(9), 60);
    }

    #[tokio::test]
    async fn test_retry_waits_for_backoff_then_succeeds() {
        let handler = Arc::new(Flaky { failures: 2, calls: AtomicU32::new(0) });
        let (_dir, queue) = queue(handler.clone()).await;
        let job = queue.enqueue(payload(), t0()).await.unwrap();

        assert_eq!(queue.run_due(t0()).await.unwrap().retried, 1);
        // Not due before the 10s backoff
        assert_eq!(queue.run_due(t0() + ChronoDuration::seconds(9)).await.unwrap(), RunSummary::default());

        let t1 = t0() + ChronoDuration::seconds(10);
        assert_eq!(queue.run_due(t1).await.unwrap().retried, 1);
        assert_eq!(queue.run_due(t1 + ChronoDuration::seconds(29)).await.unwrap(), RunSummary::default());

        let t2 = t1 + ChronoDuration::seconds(30);
        assert_eq!(queue.run_due(t2).await.unwrap().done, 1);

        let job = queue.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_job_is_dead_lettered_not_dropped() {
        let handler = Arc::new(Flaky { failures: u32::MAX, calls: AtomicU32::new(0) });
        let (_dir, queue) = queue(handler.clone()).await;
        let job = queue.enqueue(payload(), t0()).await.unwrap();

        let mut now = t0();
        for _ in 0..10 {
            queue.run_due(now).await.unwrap();
            now += ChronoDuration::seconds(120);
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, job.id);
        assert_eq!(dead[0].last_error.as_deref(), Some("failure 3"));
    }

    #[tokio::test]
    async fn test_expired_lease_on_last_attempt_is_dead_lettered() {
        let handler = Arc::new(Flaky { failures: 0, calls: AtomicU32::new(0) });
        let (_dir, queue) = queue(handler.clone()).await;
        let job = queue.enqueue(payload(), t0()).await.unwrap();

        // Worker vanished mid-way through the final attempt
        sqlx::query("UPDATE jobs SET status = 'running', attempts = ?, available_at = ? WHERE id = ?")
            .bind(MAX_ATTEMPTS as i64)
            .bind(t0().timestamp())
            .bind(job.id.to_string())
            .execute(&queue.pool)
            .await
            .unwrap();

        let summary = queue.run_due(t0()).await.unwrap();
        assert_eq!(summary.dead, 1);
        assert_eq!(summary.released, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        let job = queue.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Dead);
        assert!(job.last_error.is_some());
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately_and_can_be_requeued() {
        let (_dir, queue) = queue(Arc::new(Doomed)).await;
        let mut rx = queue.events.subscribe();
        let job = queue.enqueue(payload(), t0()).await.unwrap();

        assert_eq!(queue.run_due(t0()).await.unwrap().dead, 1);
        assert!(matches!(rx.recv().await.unwrap(), LnpEvent::JobDeadLettered { .. }));

        let requeued = queue.requeue_dead(job.id, t0()).await.unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert_eq!(requeued.attempts, 0);

        // Only dead jobs can be requeued
        assert!(matches!(
            queue.requeue_dead(job.id, t0()).await,
            Err(ApiError::PreconditionFailed(_))
        ));
    }
}
