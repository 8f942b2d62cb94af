//! Fixed-window rate limit counters
//!
//! One row per bucket. The increment is a single UPSERT that also resets the
//! count when the stored window is older than the caller's.

use lnp_common::Result;
use sqlx::{Row, SqlitePool};

/// Hits recorded in `window_start` for `bucket` (0 for a stale or missing row)
pub async fn hits_in_window(pool: &SqlitePool, bucket: &str, window_start: i64) -> Result<i64> {
    let row = sqlx::query("SELECT window_start, hits FROM rate_limit_counters WHERE bucket = ?")
        .bind(bucket)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let stored_start: i64 = row.try_get("window_start")?;
            if stored_start == window_start {
                Ok(row.try_get("hits")?)
            } else {
                Ok(0)
            }
        }
        None => Ok(0),
    }
}

/// Count one hit and return the new total for the window
pub async fn increment(pool: &SqlitePool, bucket: &str, window_start: i64) -> Result<i64> {
    let hits: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO rate_limit_counters (bucket, window_start, hits)
        VALUES (?, ?, 1)
        ON CONFLICT (bucket) DO UPDATE SET
            hits = CASE
                WHEN rate_limit_counters.window_start = excluded.window_start
                THEN rate_limit_counters.hits + 1
                ELSE 1
            END,
            window_start = excluded.window_start
        RETURNING hits
        "#,
    )
    .bind(bucket)
    .bind(window_start)
    .fetch_one(pool)
    .await?;
    Ok(hits)
}

/// Drop rows whose window ended before `before`
pub async fn purge_before(pool: &SqlitePool, before: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_start < ?")
        .bind(before)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
