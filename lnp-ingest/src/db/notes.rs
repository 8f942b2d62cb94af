//! Lesson note and version persistence
//!
//! The two write paths that matter for correctness:
//! - [`commit_upload`] resolves the slot's note (creating it when absent),
//!   inserts the next version and moves the current-version pointer, all in
//!   one transaction.
//! - [`stamp_review`] updates the note status and the current version's
//!   review fields, conditional on the note still being pending.

use chrono::{DateTime, Utc};
use lnp_common::time::{parse_db, to_db};
use lnp_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_term, parse_uuid, parse_week};
use crate::models::{
    AcademicContext, DocumentMetadata, LessonNote, LessonNoteVersion, NewVersion, NoteStatus,
    SlotKey,
};
use crate::utils::begin_monitored;

const NOTE_COLUMNS: &str = "id, teacher_id, subject_id, classroom_id, session_id, term, week, \
     status, current_version_id, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, lesson_note_id, version_number, file_path, file_name, \
     file_size, file_hash, uploaded_by, status, reviewer_comment, reviewed_by, reviewed_at, \
     scan_result, mime_type, is_duplicate, page_count, author, document_modified_at, \
     cdn_available, thumbnail_path, created_at";

/// Selection for review queues
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    pub status: Option<NoteStatus>,
    pub teacher_id: Option<i64>,
    pub session_id: Option<i64>,
    pub term: Option<i64>,
    pub week: Option<i64>,
    pub limit: Option<i64>,
}

/// Result of the upload commit transaction
#[derive(Debug, Clone)]
pub struct CommittedUpload {
    pub note: LessonNote,
    pub version: LessonNoteVersion,
    pub created_note: bool,
}

fn note_from_row(row: &SqliteRow) -> Result<LessonNote> {
    let status: String = row.try_get("status")?;
    let current: Option<String> = row.try_get("current_version_id")?;

    Ok(LessonNote {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        slot: SlotKey {
            teacher_id: row.try_get("teacher_id")?,
            subject_id: row.try_get("subject_id")?,
            classroom_id: row.try_get("classroom_id")?,
            context: AcademicContext::new(
                row.try_get("session_id")?,
                parse_term(row.try_get("term")?)?,
            ),
            week: parse_week(row.try_get("week")?)?,
        },
        status: status.parse().map_err(Error::Internal)?,
        current_version_id: current.as_deref().map(parse_uuid).transpose()?,
        created_at: parse_db(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_db(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn version_from_row(row: &SqliteRow) -> Result<LessonNoteVersion> {
    let status: String = row.try_get("status")?;
    let reviewed_at: Option<String> = row.try_get("reviewed_at")?;
    let modified_at: Option<String> = row.try_get("document_modified_at")?;

    Ok(LessonNoteVersion {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        lesson_note_id: parse_uuid(&row.try_get::<String, _>("lesson_note_id")?)?,
        version_number: row.try_get("version_number")?,
        file_path: row.try_get("file_path")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get("file_size")?,
        file_hash: row.try_get("file_hash")?,
        uploaded_by: row.try_get("uploaded_by")?,
        status: status.parse().map_err(Error::Internal)?,
        reviewer_comment: row.try_get("reviewer_comment")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: reviewed_at.as_deref().map(parse_db).transpose()?,
        scan_result: row.try_get("scan_result")?,
        mime_type: row.try_get("mime_type")?,
        is_duplicate: row.try_get("is_duplicate")?,
        metadata: DocumentMetadata {
            page_count: row.try_get("page_count")?,
            author: row.try_get("author")?,
            modified_at: modified_at.as_deref().map(parse_db).transpose()?,
        },
        cdn_available: row.try_get("cdn_available")?,
        thumbnail_path: row.try_get("thumbnail_path")?,
        created_at: parse_db(&row.try_get::<String, _>("created_at")?)?,
    })
}

/// Insert a fresh pending note for `slot`
///
/// A second note for the same slot fails with a UNIQUE violation
/// (`Error::is_unique_violation`).
pub async fn create_note(pool: &SqlitePool, slot: &SlotKey, now: DateTime<Utc>) -> Result<LessonNote> {
    let id = Uuid::new_v4();
    let ts = to_db(now);

    sqlx::query(
        r#"
        INSERT INTO lesson_notes
            (id, teacher_id, subject_id, classroom_id, session_id, term, week,
             status, current_version_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', NULL, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(slot.teacher_id)
    .bind(slot.subject_id)
    .bind(slot.classroom_id)
    .bind(slot.context.session_id)
    .bind(slot.context.term.as_i64())
    .bind(i64::from(slot.week))
    .bind(&ts)
    .bind(&ts)
    .execute(pool)
    .await?;

    Ok(LessonNote {
        id,
        slot: *slot,
        status: NoteStatus::Pending,
        current_version_id: None,
        created_at: now,
        updated_at: now,
    })
}

async fn find_by_slot_conn(conn: &mut SqliteConnection, slot: &SlotKey) -> Result<Option<LessonNote>> {
    let sql = format!(
        "SELECT {} FROM lesson_notes WHERE teacher_id = ? AND subject_id = ? AND classroom_id = ? \
         AND session_id = ? AND term = ? AND week = ?",
        NOTE_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(slot.teacher_id)
        .bind(slot.subject_id)
        .bind(slot.classroom_id)
        .bind(slot.context.session_id)
        .bind(slot.context.term.as_i64())
        .bind(i64::from(slot.week))
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(note_from_row).transpose()
}

pub async fn find_by_slot(pool: &SqlitePool, slot: &SlotKey) -> Result<Option<LessonNote>> {
    let mut conn = pool.acquire().await?;
    find_by_slot_conn(&mut conn, slot).await
}

async fn get_note_conn(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<LessonNote>> {
    let sql = format!("SELECT {} FROM lesson_notes WHERE id = ?", NOTE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(note_from_row).transpose()
}

pub async fn get_note(pool: &SqlitePool, id: Uuid) -> Result<Option<LessonNote>> {
    let mut conn = pool.acquire().await?;
    get_note_conn(&mut conn, id).await
}

/// Notes matching `filter`, most recently updated first
pub async fn list_notes(pool: &SqlitePool, filter: &NoteFilter) -> Result<Vec<LessonNote>> {
    let sql = format!(
        "SELECT {} FROM lesson_notes \
         WHERE (?1 IS NULL OR status = ?1) \
           AND (?2 IS NULL OR teacher_id = ?2) \
           AND (?3 IS NULL OR session_id = ?3) \
           AND (?4 IS NULL OR term = ?4) \
           AND (?5 IS NULL OR week = ?5) \
         ORDER BY updated_at DESC LIMIT ?6",
        NOTE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.teacher_id)
        .bind(filter.session_id)
        .bind(filter.term)
        .bind(filter.week)
        .bind(filter.limit.unwrap_or(500))
        .fetch_all(pool)
        .await?;

    rows.iter().map(note_from_row).collect()
}

/// Persist a validated upload
///
/// The first statement is a slot upsert, so the transaction holds the write
/// lock before it reads the next version number; concurrent commits to one
/// note serialize and the last one committed stays current. Two racing first
/// uploads for an empty slot both land on the single note the UNIQUE index
/// allows.
pub async fn commit_upload(
    pool: &SqlitePool,
    slot: &SlotKey,
    new: &NewVersion,
    now: DateTime<Utc>,
) -> Result<CommittedUpload> {
    let candidate_id = Uuid::new_v4();
    let version_id = Uuid::new_v4();
    let ts = to_db(now);

    let mut tx = begin_monitored(pool, "notes::commit_upload").await?;

    sqlx::query(
        r#"
        INSERT INTO lesson_notes
            (id, teacher_id, subject_id, classroom_id, session_id, term, week,
             status, current_version_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', NULL, ?, ?)
        ON CONFLICT (teacher_id, subject_id, classroom_id, session_id, term, week)
        DO UPDATE SET updated_at = excluded.updated_at
        "#,
    )
    .bind(candidate_id.to_string())
    .bind(slot.teacher_id)
    .bind(slot.subject_id)
    .bind(slot.classroom_id)
    .bind(slot.context.session_id)
    .bind(slot.context.term.as_i64())
    .bind(i64::from(slot.week))
    .bind(&ts)
    .bind(&ts)
    .execute(tx.conn()?)
    .await?;

    let note = find_by_slot_conn(tx.conn()?, slot)
        .await?
        .ok_or_else(|| Error::Internal("slot row missing after upsert".to_string()))?;
    let created_note = note.id == candidate_id;

    let next_number: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(version_number), 0) + 1 FROM lesson_note_versions WHERE lesson_note_id = ?",
    )
    .bind(note.id.to_string())
    .fetch_one(tx.conn()?)
    .await?;

    // Authoritative duplicate check, under the write lock
    let hash_seen: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM lesson_note_versions WHERE lesson_note_id = ? AND file_hash = ?)",
    )
    .bind(note.id.to_string())
    .bind(&new.file_hash)
    .fetch_one(tx.conn()?)
    .await?;
    let is_duplicate = new.is_duplicate || hash_seen;

    sqlx::query(
        r#"
        INSERT INTO lesson_note_versions
            (id, lesson_note_id, version_number, file_path, file_name, file_size, file_hash,
             uploaded_by, status, scan_result, mime_type, is_duplicate, page_count, author,
             document_modified_at, cdn_available, thumbnail_path, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(version_id.to_string())
    .bind(note.id.to_string())
    .bind(next_number)
    .bind(&new.file_path)
    .bind(&new.file_name)
    .bind(new.file_size)
    .bind(&new.file_hash)
    .bind(new.uploaded_by)
    .bind(&new.scan_result)
    .bind(&new.mime_type)
    .bind(is_duplicate)
    .bind(new.metadata.page_count)
    .bind(&new.metadata.author)
    .bind(new.metadata.modified_at.map(to_db))
    .bind(&new.thumbnail_path)
    .bind(&ts)
    .execute(tx.conn()?)
    .await?;

    // Pointer and status move with the insert; a prior rejection is cleared
    sqlx::query(
        "UPDATE lesson_notes SET current_version_id = ?, status = 'pending', updated_at = ? WHERE id = ?",
    )
    .bind(version_id.to_string())
    .bind(&ts)
    .bind(note.id.to_string())
    .execute(tx.conn()?)
    .await?;

    tx.commit().await?;

    let note = LessonNote {
        status: NoteStatus::Pending,
        current_version_id: Some(version_id),
        updated_at: now,
        ..note
    };
    let version = LessonNoteVersion {
        id: version_id,
        lesson_note_id: note.id,
        version_number: next_number,
        file_path: new.file_path.clone(),
        file_name: new.file_name.clone(),
        file_size: new.file_size,
        file_hash: new.file_hash.clone(),
        uploaded_by: new.uploaded_by,
        status: NoteStatus::Pending,
        reviewer_comment: None,
        reviewed_by: None,
        reviewed_at: None,
        scan_result: new.scan_result.clone(),
        mime_type: new.mime_type.clone(),
        is_duplicate,
        metadata: new.metadata.clone(),
        cdn_available: false,
        thumbnail_path: new.thumbnail_path.clone(),
        created_at: now,
    };

    Ok(CommittedUpload {
        note,
        version,
        created_note,
    })
}

/// Versions of a note, newest first
pub async fn list_versions(pool: &SqlitePool, note_id: Uuid) -> Result<Vec<LessonNoteVersion>> {
    let sql = format!(
        "SELECT {} FROM lesson_note_versions WHERE lesson_note_id = ? ORDER BY version_number DESC",
        VERSION_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(note_id.to_string())
        .fetch_all(pool)
        .await?;
    rows.iter().map(version_from_row).collect()
}

pub async fn get_version(pool: &SqlitePool, id: Uuid) -> Result<Option<LessonNoteVersion>> {
    let sql = format!("SELECT {} FROM lesson_note_versions WHERE id = ?", VERSION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(version_from_row).transpose()
}

/// Whether `note_id` already holds a version with this content hash
pub async fn has_version_with_hash(pool: &SqlitePool, note_id: Uuid, hash: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM lesson_note_versions WHERE lesson_note_id = ? AND file_hash = ?)",
    )
    .bind(note_id.to_string())
    .bind(hash)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Review stamp applied by [`stamp_review`]
#[derive(Debug, Clone)]
pub struct ReviewStamp<'a> {
    pub outcome: NoteStatus,
    pub comment: Option<&'a str>,
    pub reviewer_id: i64,
    pub at: DateTime<Utc>,
}

/// Move a pending note (and its current version) to `stamp.outcome`
///
/// Returns `None`, changing nothing, when the note is missing, no longer
/// pending, or has no version yet.
pub async fn stamp_review(
    pool: &SqlitePool,
    note_id: Uuid,
    stamp: &ReviewStamp<'_>,
) -> Result<Option<(LessonNote, LessonNoteVersion)>> {
    let ts = to_db(stamp.at);
    let mut tx = begin_monitored(pool, "notes::stamp_review").await?;

    let updated = sqlx::query(
        r#"
        UPDATE lesson_notes SET status = ?, updated_at = ?
        WHERE id = ? AND status = 'pending' AND current_version_id IS NOT NULL
        "#,
    )
    .bind(stamp.outcome.as_str())
    .bind(&ts)
    .bind(note_id.to_string())
    .execute(tx.conn()?)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    let note = get_note_conn(tx.conn()?, note_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("note {} vanished during review", note_id)))?;
    let version_id = note
        .current_version_id
        .ok_or_else(|| Error::Internal(format!("note {} lost its current version", note_id)))?;

    sqlx::query(
        r#"
        UPDATE lesson_note_versions
        SET status = ?, reviewer_comment = ?, reviewed_by = ?, reviewed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(stamp.outcome.as_str())
    .bind(stamp.comment)
    .bind(stamp.reviewer_id)
    .bind(&ts)
    .bind(version_id.to_string())
    .execute(tx.conn()?)
    .await?;

    let sql = format!("SELECT {} FROM lesson_note_versions WHERE id = ?", VERSION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(version_id.to_string())
        .fetch_one(tx.conn()?)
        .await?;
    let version = version_from_row(&row)?;

    tx.commit().await?;
    Ok(Some((note, version)))
}

/// Record that a version has been published to the mirror (idempotent)
pub async fn mark_cdn_available(pool: &SqlitePool, version_id: Uuid) -> Result<bool> {
    let result = sqlx::query("UPDATE lesson_note_versions SET cdn_available = 1 WHERE id = ?")
        .bind(version_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
