//! Database initialization tests
//!
//! Covers idempotent schema creation and the storage-level uniqueness
//! constraints the pipeline relies on.

use lnp_common::db::init::{get_setting_i64, init_database};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("lnp.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("lnp.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to reopen database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("lnp.db")).await.unwrap();

    let wait = get_setting_i64(&pool, "database_max_lock_wait_ms").await.unwrap();
    assert_eq!(wait, Some(5000));
}

#[tokio::test]
async fn test_lesson_note_slot_unique_at_storage_layer() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("lnp.db")).await.unwrap();

    let insert = |id: &'static str| {
        sqlx::query(
            "INSERT INTO lesson_notes (id, teacher_id, subject_id, classroom_id, session_id, term, week, status, created_at, updated_at)
             VALUES (?, 7, 3, 2, 2024, 1, 1, 'pending', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .bind(id)
    };

    insert("a").execute(&pool).await.unwrap();
    let err = insert("b").execute(&pool).await.unwrap_err();
    let err = lnp_common::Error::from(err);
    assert!(err.is_unique_violation(), "expected UNIQUE violation, got {}", err);
}

#[tokio::test]
async fn test_week_outside_domain_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("lnp.db")).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO submission_windows (id, session_id, term, week, opens_at, closes_at, is_open, updated_at)
         VALUES ('w', 2024, 1, 13, 'x', 'y', 1, 'z')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err(), "week 13 must violate the CHECK constraint");
}

#[tokio::test]
async fn test_audit_rows_are_immutable() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("lnp.db")).await.unwrap();

    sqlx::query(
        "INSERT INTO audit_log (subject_type, subject_id, action, actor_id, details, created_at)
         VALUES ('lesson_note', 'n1', 'uploaded', 7, '{}', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let result = sqlx::query("UPDATE audit_log SET action = 'tampered'")
        .execute(&pool)
        .await;
    assert!(result.is_err());
}
