//! Database initialization
//!
//! Creates every table the pipeline needs, idempotently. Invariants that must
//! hold under concurrent writers live here as constraints rather than in
//! application code:
//! - one lesson note per (teacher, subject, classroom, session, term, week)
//! - one submission window per (session, term, week)
//! - one subject grant per (teacher, subject, classroom, session, term)
//! - one class-teacher grant per (teacher, classroom, session)
//! - version numbers unique per note

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the database at `db_path` and apply the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Per-connection pragmas: every pooled connection needs them
                sqlx::query("PRAGMA foreign_keys = ON")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL: concurrent readers alongside the single writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (safe to call repeatedly)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_assignment_tables(pool).await?;
    create_submission_windows_table(pool).await?;
    create_lesson_notes_table(pool).await?;
    create_lesson_note_versions_table(pool).await?;
    create_audit_log_table(pool).await?;
    create_jobs_table(pool).await?;
    create_rate_limit_table(pool).await?;
    Ok(())
}

pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_assignment_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teacher_subject_assignments (
            id TEXT PRIMARY KEY,
            teacher_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            classroom_id INTEGER NOT NULL,
            session_id INTEGER NOT NULL,
            term INTEGER NOT NULL CHECK (term BETWEEN 1 AND 3),
            created_at TEXT NOT NULL,
            UNIQUE (teacher_id, subject_id, classroom_id, session_id, term)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS class_teacher_assignments (
            id TEXT PRIMARY KEY,
            teacher_id INTEGER NOT NULL,
            classroom_id INTEGER NOT NULL,
            session_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (teacher_id, classroom_id, session_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_subject_assignments_teacher ON teacher_subject_assignments(teacher_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_class_assignments_teacher ON class_teacher_assignments(teacher_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_submission_windows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submission_windows (
            id TEXT PRIMARY KEY,
            session_id INTEGER NOT NULL,
            term INTEGER NOT NULL CHECK (term BETWEEN 1 AND 3),
            week INTEGER NOT NULL CHECK (week BETWEEN 1 AND 12),
            opens_at TEXT NOT NULL,
            closes_at TEXT NOT NULL,
            is_open INTEGER NOT NULL DEFAULT 0,
            updated_by INTEGER,
            updated_at TEXT NOT NULL,
            UNIQUE (session_id, term, week)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_lesson_notes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lesson_notes (
            id TEXT PRIMARY KEY,
            teacher_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            classroom_id INTEGER NOT NULL,
            session_id INTEGER NOT NULL,
            term INTEGER NOT NULL CHECK (term BETWEEN 1 AND 3),
            week INTEGER NOT NULL CHECK (week BETWEEN 1 AND 12),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'approved', 'rejected')),
            current_version_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (teacher_id, subject_id, classroom_id, session_id, term, week)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_lesson_notes_status ON lesson_notes(status)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_lesson_note_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lesson_note_versions (
            id TEXT PRIMARY KEY,
            lesson_note_id TEXT NOT NULL,
            version_number INTEGER NOT NULL,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            file_hash TEXT NOT NULL,
            uploaded_by INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'approved', 'rejected')),
            reviewer_comment TEXT,
            reviewed_by INTEGER,
            reviewed_at TEXT,
            scan_result TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            is_duplicate INTEGER NOT NULL DEFAULT 0,
            page_count INTEGER,
            author TEXT,
            document_modified_at TEXT,
            cdn_available INTEGER NOT NULL DEFAULT 0,
            thumbnail_path TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (lesson_note_id) REFERENCES lesson_notes(id),
            UNIQUE (lesson_note_id, version_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_versions_note_hash ON lesson_note_versions(lesson_note_id, file_hash)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_audit_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_type TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            action TEXT NOT NULL,
            actor_id INTEGER,
            details TEXT NOT NULL DEFAULT '{}',
            dedup_key TEXT UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rows are immutable once written
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS audit_log_no_update
        BEFORE UPDATE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit_log rows are immutable');
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_subject ON audit_log(subject_type, subject_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued'
                CHECK (status IN ('queued', 'running', 'done', 'dead')),
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            available_at INTEGER NOT NULL,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(status, available_at)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_rate_limit_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rate_limit_counters (
            bucket TEXT PRIMARY KEY,
            window_start INTEGER NOT NULL,
            hits INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Upper bound for retry_on_lock when SQLite reports contention
    ensure_setting(pool, "database_max_lock_wait_ms", "5000").await?;
    ensure_setting(pool, "schema_version", "1").await?;
    Ok(())
}

/// Insert a setting only when the key is absent
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;
    Ok(())
}

/// Read a setting as i64, None when missing or unparsable
pub async fn get_setting_i64(pool: &SqlitePool, key: &str) -> Result<Option<i64>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value.and_then(|v| v.trim().parse().ok()))
}
