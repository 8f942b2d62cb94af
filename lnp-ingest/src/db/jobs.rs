//! Job queue persistence
//!
//! `available_at` is unix seconds so due-ness is a plain integer compare.
//! Claiming is a single `UPDATE ... RETURNING`, so two workers never run the
//! same job attempt. A claimed row's `available_at` is its lease deadline.

use chrono::{DateTime, Utc};
use lnp_common::time::{parse_db, to_db};
use lnp_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::models::{Job, JobPayload, JobStatus};

const JOB_COLUMNS: &str =
    "id, kind, payload, status, attempts, max_attempts, available_at, last_error, created_at, updated_at";

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let payload: String = row.try_get("payload")?;
    let status: String = row.try_get("status")?;
    let attempts: i64 = row.try_get("attempts")?;
    let max_attempts: i64 = row.try_get("max_attempts")?;

    Ok(Job {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| Error::Internal(format!("Corrupt job payload: {}", e)))?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown job status '{}'", status)))?,
        attempts: attempts.max(0) as u32,
        max_attempts: max_attempts.max(0) as u32,
        available_at: row.try_get("available_at")?,
        last_error: row.try_get("last_error")?,
        created_at: parse_db(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_db(&row.try_get::<String, _>("updated_at")?)?,
    })
}

pub async fn insert(
    pool: &SqlitePool,
    payload: &JobPayload,
    max_attempts: u32,
    available_at: i64,
    now: DateTime<Utc>,
) -> Result<Job> {
    let id = Uuid::new_v4();
    let json = serde_json::to_string(payload)
        .map_err(|e| Error::Internal(format!("Serialize job payload: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO jobs (id, kind, payload, status, attempts, max_attempts, available_at, created_at, updated_at)
        VALUES (?, ?, ?, 'queued', 0, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(payload.kind())
    .bind(json)
    .bind(max_attempts as i64)
    .bind(available_at)
    .bind(to_db(now))
    .bind(to_db(now))
    .execute(pool)
    .await?;

    Ok(Job {
        id,
        payload: payload.clone(),
        status: JobStatus::Queued,
        attempts: 0,
        max_attempts,
        available_at,
        last_error: None,
        created_at: now,
        updated_at: now,
    })
}

/// Claim the next due job, marking it running and counting the attempt
///
/// While running, `available_at` holds the lease deadline: a row still
/// `running` past it was abandoned mid-attempt.
pub async fn claim_next(pool: &SqlitePool, now: DateTime<Utc>, lease_until: i64) -> Result<Option<Job>> {
    let sql = format!(
        r#"
        UPDATE jobs SET status = 'running', attempts = attempts + 1, available_at = ?1, updated_at = ?2
        WHERE id = (
            SELECT id FROM jobs
            WHERE status = 'queued' AND available_at <= ?3
            ORDER BY available_at, created_at
            LIMIT 1
        )
        RETURNING {}
        "#,
        JOB_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(lease_until)
        .bind(to_db(now))
        .bind(now.timestamp())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Release jobs whose lease ran out while `running`
///
/// Jobs with attempts left go back to the queue at once; the rest are
/// dead-lettered. Returns (requeued, dead).
pub async fn release_expired_leases(pool: &SqlitePool, now: DateTime<Utc>) -> Result<(u64, u64)> {
    let ts = to_db(now);

    let dead = sqlx::query(
        r#"
        UPDATE jobs SET status = 'dead', last_error = 'lease expired before the attempt was recorded',
            updated_at = ?1
        WHERE status = 'running' AND available_at <= ?2 AND attempts >= max_attempts
        "#,
    )
    .bind(&ts)
    .bind(now.timestamp())
    .execute(pool)
    .await?;

    let requeued = sqlx::query(
        r#"
        UPDATE jobs SET status = 'queued', available_at = ?2, updated_at = ?1
        WHERE status = 'running' AND available_at <= ?2
        "#,
    )
    .bind(&ts)
    .bind(now.timestamp())
    .execute(pool)
    .await?;

    Ok((requeued.rows_affected(), dead.rows_affected()))
}

pub async fn mark_done(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = 'done', last_error = NULL, updated_at = ? WHERE id = ?")
        .bind(to_db(now))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn schedule_retry(
    pool: &SqlitePool,
    id: Uuid,
    available_at: i64,
    error: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'queued', available_at = ?, last_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(available_at)
    .bind(error)
    .bind(to_db(now))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_dead(pool: &SqlitePool, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = 'dead', last_error = ?, updated_at = ? WHERE id = ?")
        .bind(error)
        .bind(to_db(now))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn list_by_status(pool: &SqlitePool, status: JobStatus) -> Result<Vec<Job>> {
    let sql = format!(
        "SELECT {} FROM jobs WHERE status = ? ORDER BY updated_at DESC",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;
    rows.iter().map(job_from_row).collect()
}

/// Give a dead job a fresh set of attempts; false when it is not dead
pub async fn requeue_dead(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = 'queued', attempts = 0, available_at = ?, updated_at = ?
        WHERE id = ? AND status = 'dead'
        "#,
    )
    .bind(now.timestamp())
    .bind(to_db(now))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Return jobs left `running` by a crashed worker to the queue
pub async fn recover_running(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'queued', available_at = ?, updated_at = ? WHERE status = 'running'",
    )
    .bind(now.timestamp())
    .bind(to_db(now))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
