//! Submission window persistence

use chrono::{DateTime, Utc};
use lnp_common::time::{parse_db, to_db};
use lnp_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_term, parse_uuid, parse_week};
use crate::models::{SubmissionWindow, Term, Week};

const WINDOW_COLUMNS: &str =
    "id, session_id, term, week, opens_at, closes_at, is_open, updated_by, updated_at";

fn window_from_row(row: &SqliteRow) -> Result<SubmissionWindow> {
    Ok(SubmissionWindow {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        session_id: row.try_get("session_id")?,
        term: parse_term(row.try_get("term")?)?,
        week: parse_week(row.try_get("week")?)?,
        opens_at: parse_db(&row.try_get::<String, _>("opens_at")?)?,
        closes_at: parse_db(&row.try_get::<String, _>("closes_at")?)?,
        is_open: row.try_get("is_open")?,
        updated_by: row.try_get("updated_by")?,
        updated_at: parse_db(&row.try_get::<String, _>("updated_at")?)?,
    })
}

pub async fn find_by_key(
    pool: &SqlitePool,
    session_id: i64,
    term: Term,
    week: Week,
) -> Result<Option<SubmissionWindow>> {
    let sql = format!(
        "SELECT {} FROM submission_windows WHERE session_id = ? AND term = ? AND week = ?",
        WINDOW_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(session_id)
        .bind(term.as_i64())
        .bind(i64::from(week))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(window_from_row).transpose()
}

pub async fn list_for_term(pool: &SqlitePool, session_id: i64, term: Term) -> Result<Vec<SubmissionWindow>> {
    let sql = format!(
        "SELECT {} FROM submission_windows WHERE session_id = ? AND term = ? ORDER BY week",
        WINDOW_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(session_id)
        .bind(term.as_i64())
        .fetch_all(pool)
        .await?;
    rows.iter().map(window_from_row).collect()
}

/// Window definition written by [`upsert`]
#[derive(Debug, Clone)]
pub struct WindowSchedule {
    pub session_id: i64,
    pub term: Term,
    pub week: Week,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    /// `None` keeps the current flag (closed for a new window)
    pub is_open: Option<bool>,
}

/// Define or reschedule the window for (session, term, week)
pub async fn upsert(
    pool: &SqlitePool,
    schedule: &WindowSchedule,
    actor_id: i64,
    now: DateTime<Utc>,
) -> Result<SubmissionWindow> {
    let sql = format!(
        r#"
        INSERT INTO submission_windows
            (id, session_id, term, week, opens_at, closes_at, is_open, updated_by, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, 0), ?8, ?9)
        ON CONFLICT (session_id, term, week) DO UPDATE SET
            opens_at = excluded.opens_at,
            closes_at = excluded.closes_at,
            is_open = COALESCE(?7, submission_windows.is_open),
            updated_by = excluded.updated_by,
            updated_at = excluded.updated_at
        RETURNING {}
        "#,
        WINDOW_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(schedule.session_id)
        .bind(schedule.term.as_i64())
        .bind(i64::from(schedule.week))
        .bind(to_db(schedule.opens_at))
        .bind(to_db(schedule.closes_at))
        .bind(schedule.is_open)
        .bind(actor_id)
        .bind(to_db(now))
        .fetch_one(pool)
        .await?;
    window_from_row(&row)
}

/// Flip the manual flag in a single statement
pub async fn toggle(
    pool: &SqlitePool,
    id: Uuid,
    actor_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<SubmissionWindow>> {
    let sql = format!(
        "UPDATE submission_windows SET is_open = 1 - is_open, updated_by = ?, updated_at = ? \
         WHERE id = ? RETURNING {}",
        WINDOW_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(actor_id)
        .bind(to_db(now))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(window_from_row).transpose()
}
