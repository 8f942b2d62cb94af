//! Teaching assignment persistence

use chrono::{DateTime, Utc};
use lnp_common::time::{parse_db, to_db};
use lnp_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_term, parse_uuid};
use crate::models::{ActiveAssignments, ClassTeacherAssignment, TeacherSubjectAssignment, Term};

fn subject_from_row(row: &SqliteRow) -> Result<TeacherSubjectAssignment> {
    Ok(TeacherSubjectAssignment {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        teacher_id: row.try_get("teacher_id")?,
        subject_id: row.try_get("subject_id")?,
        classroom_id: row.try_get("classroom_id")?,
        session_id: row.try_get("session_id")?,
        term: parse_term(row.try_get("term")?)?,
        created_at: parse_db(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn class_from_row(row: &SqliteRow) -> Result<ClassTeacherAssignment> {
    Ok(ClassTeacherAssignment {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        teacher_id: row.try_get("teacher_id")?,
        classroom_id: row.try_get("classroom_id")?,
        session_id: row.try_get("session_id")?,
        created_at: parse_db(&row.try_get::<String, _>("created_at")?)?,
    })
}

/// Duplicate grants fail with a UNIQUE violation
pub async fn insert_subject(
    pool: &SqlitePool,
    teacher_id: i64,
    subject_id: i64,
    classroom_id: i64,
    session_id: i64,
    term: Term,
    now: DateTime<Utc>,
) -> Result<TeacherSubjectAssignment> {
    let assignment = TeacherSubjectAssignment {
        id: Uuid::new_v4(),
        teacher_id,
        subject_id,
        classroom_id,
        session_id,
        term,
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO teacher_subject_assignments
            (id, teacher_id, subject_id, classroom_id, session_id, term, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(assignment.id.to_string())
    .bind(teacher_id)
    .bind(subject_id)
    .bind(classroom_id)
    .bind(session_id)
    .bind(term.as_i64())
    .bind(to_db(now))
    .execute(pool)
    .await?;

    Ok(assignment)
}

pub async fn insert_class(
    pool: &SqlitePool,
    teacher_id: i64,
    classroom_id: i64,
    session_id: i64,
    now: DateTime<Utc>,
) -> Result<ClassTeacherAssignment> {
    let assignment = ClassTeacherAssignment {
        id: Uuid::new_v4(),
        teacher_id,
        classroom_id,
        session_id,
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO class_teacher_assignments
            (id, teacher_id, classroom_id, session_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(assignment.id.to_string())
    .bind(teacher_id)
    .bind(classroom_id)
    .bind(session_id)
    .bind(to_db(now))
    .execute(pool)
    .await?;

    Ok(assignment)
}

/// Returns false when no such grant existed
pub async fn delete_subject(
    pool: &SqlitePool,
    teacher_id: i64,
    subject_id: i64,
    classroom_id: i64,
    session_id: i64,
    term: Term,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM teacher_subject_assignments
        WHERE teacher_id = ? AND subject_id = ? AND classroom_id = ? AND session_id = ? AND term = ?
        "#,
    )
    .bind(teacher_id)
    .bind(subject_id)
    .bind(classroom_id)
    .bind(session_id)
    .bind(term.as_i64())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_class(
    pool: &SqlitePool,
    teacher_id: i64,
    classroom_id: i64,
    session_id: i64,
) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM class_teacher_assignments WHERE teacher_id = ? AND classroom_id = ? AND session_id = ?",
    )
    .bind(teacher_id)
    .bind(classroom_id)
    .bind(session_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Every grant the teacher holds
pub async fn load_active(pool: &SqlitePool, teacher_id: i64) -> Result<ActiveAssignments> {
    let subject_rows = sqlx::query(
        r#"
        SELECT id, teacher_id, subject_id, classroom_id, session_id, term, created_at
        FROM teacher_subject_assignments
        WHERE teacher_id = ?
        ORDER BY session_id, term, classroom_id, subject_id
        "#,
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;

    let class_rows = sqlx::query(
        r#"
        SELECT id, teacher_id, classroom_id, session_id, created_at
        FROM class_teacher_assignments
        WHERE teacher_id = ?
        ORDER BY session_id, classroom_id
        "#,
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;

    Ok(ActiveAssignments {
        subject: subject_rows.iter().map(subject_from_row).collect::<Result<_>>()?,
        class: class_rows.iter().map(class_from_row).collect::<Result<_>>()?,
    })
}
