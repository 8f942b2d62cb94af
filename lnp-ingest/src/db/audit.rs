//! Audit log persistence (insert-only)

use chrono::{DateTime, Utc};
use lnp_common::time::{parse_db, to_db};
use lnp_common::Result;
use sqlx::{Row, SqlitePool};

use crate::models::AuditLogEntry;

/// Row to append
#[derive(Debug, Clone)]
pub struct NewAuditEntry<'a> {
    pub subject_type: &'a str,
    pub subject_id: &'a str,
    pub action: &'a str,
    pub actor_id: Option<i64>,
    pub details: &'a serde_json::Value,
    /// Replays with the same key are ignored
    pub dedup_key: Option<&'a str>,
}

/// Insert an entry; returns the new row id, or `None` when the dedup key
/// was already recorded
pub async fn insert(pool: &SqlitePool, entry: &NewAuditEntry<'_>, now: DateTime<Utc>) -> Result<Option<i64>> {
    let details = serde_json::to_string(entry.details)
        .map_err(|e| lnp_common::Error::Internal(format!("audit details: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO audit_log (subject_type, subject_id, action, actor_id, details, dedup_key, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (dedup_key) DO NOTHING
        "#,
    )
    .bind(entry.subject_type)
    .bind(entry.subject_id)
    .bind(entry.action)
    .bind(entry.actor_id)
    .bind(details)
    .bind(entry.dedup_key)
    .bind(to_db(now))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        Ok(None)
    } else {
        Ok(Some(result.last_insert_rowid()))
    }
}

/// Entries for one subject, oldest first
pub async fn entries_for(pool: &SqlitePool, subject_type: &str, subject_id: &str) -> Result<Vec<AuditLogEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, subject_type, subject_id, action, actor_id, details, created_at
        FROM audit_log
        WHERE subject_type = ? AND subject_id = ?
        ORDER BY id
        "#,
    )
    .bind(subject_type)
    .bind(subject_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<AuditLogEntry> {
            let details: String = row.try_get("details")?;
            Ok(AuditLogEntry {
                id: row.try_get("id")?,
                subject_type: row.try_get("subject_type")?,
                subject_id: row.try_get("subject_id")?,
                action: row.try_get("action")?,
                actor_id: row.try_get("actor_id")?,
                details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
                created_at: parse_db(&row.try_get::<String, _>("created_at")?)?,
            })
        })
        .collect()
}
