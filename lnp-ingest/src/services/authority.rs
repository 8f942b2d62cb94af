//! Upload authority and assignment management
//!
//! Authority is the union of two independently scoped grants:
//! - class teacher of (classroom, session): every subject, every term
//! - subject teacher of (subject, classroom, session, term): that tuple only

use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use super::audit_logger::AuditLogger;
use super::cache::CacheLayer;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    AcademicContext, ActiveAssignments, Actor, Area, ClassTeacherAssignment,
    TeacherSubjectAssignment, Term,
};

/// Pure upload capability: non-teachers never upload
pub fn can_upload(
    actor: &Actor,
    subject_id: i64,
    classroom_id: i64,
    context: AcademicContext,
    grants: &ActiveAssignments,
) -> bool {
    actor.is_teacher() && grants.grants(subject_id, classroom_id, context)
}

fn require_area(actor: &Actor, area: Area) -> ApiResult<()> {
    if actor.can_access_area(area) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "role '{}' may not access {:?}",
            actor.role.as_str(),
            area
        )))
    }
}

pub(crate) fn conflict_or(err: lnp_common::Error, what: &str) -> ApiError {
    if err.is_unique_violation() {
        ApiError::Conflict(format!("{} already exists", what))
    } else {
        ApiError::Common(err)
    }
}

pub struct AssignmentAuthority {
    pool: SqlitePool,
    cache: Arc<CacheLayer>,
    audit: AuditLogger,
}

impl AssignmentAuthority {
    pub fn new(pool: SqlitePool, cache: Arc<CacheLayer>, audit: AuditLogger) -> Self {
        Self { pool, cache, audit }
    }

    /// Whether `actor` may upload for (subject, classroom) in `context`
    pub async fn can_upload(
        &self,
        actor: &Actor,
        subject_id: i64,
        classroom_id: i64,
        context: AcademicContext,
    ) -> ApiResult<bool> {
        if !actor.is_teacher() {
            return Ok(false);
        }
        let grants = self.cache.active_assignments(actor.id).await?;
        Ok(can_upload(actor, subject_id, classroom_id, context, &grants))
    }

    pub async fn active_assignments(&self, teacher_id: i64) -> ApiResult<ActiveAssignments> {
        self.cache.active_assignments(teacher_id).await
    }

    pub async fn assign_subject_teacher(
        &self,
        actor: &Actor,
        teacher_id: i64,
        subject_id: i64,
        classroom_id: i64,
        context: AcademicContext,
    ) -> ApiResult<TeacherSubjectAssignment> {
        require_area(actor, Area::AssignmentManagement)?;

        let assignment = db::assignments::insert_subject(
            &self.pool,
            teacher_id,
            subject_id,
            classroom_id,
            context.session_id,
            context.term,
            lnp_common::time::now(),
        )
        .await
        .map_err(|e| conflict_or(e, "subject assignment"))?;

        self.cache.invalidate_assignments(teacher_id).await;
        info!(teacher_id, subject_id, classroom_id, session_id = context.session_id, term = %context.term, "Subject teacher assigned");
        self.audit
            .append(
                "teacher_subject_assignment",
                &assignment.id.to_string(),
                "created",
                Some(actor.id),
                json!({
                    "teacher_id": teacher_id,
                    "subject_id": subject_id,
                    "classroom_id": classroom_id,
                    "session_id": context.session_id,
                    "term": context.term,
                }),
            )
            .await;

        Ok(assignment)
    }

    pub async fn assign_class_teacher(
        &self,
        actor: &Actor,
        teacher_id: i64,
        classroom_id: i64,
        session_id: i64,
    ) -> ApiResult<ClassTeacherAssignment> {
        require_area(actor, Area::AssignmentManagement)?;

        let assignment = db::assignments::insert_class(
            &self.pool,
            teacher_id,
            classroom_id,
            session_id,
            lnp_common::time::now(),
        )
        .await
        .map_err(|e| conflict_or(e, "class teacher assignment"))?;

        self.cache.invalidate_assignments(teacher_id).await;
        info!(teacher_id, classroom_id, session_id, "Class teacher assigned");
        self.audit
            .append(
                "class_teacher_assignment",
                &assignment.id.to_string(),
                "created",
                Some(actor.id),
                json!({
                    "teacher_id": teacher_id,
                    "classroom_id": classroom_id,
                    "session_id": session_id,
                }),
            )
            .await;

        Ok(assignment)
    }

    pub async fn remove_subject_assignment(
        &self,
        actor: &Actor,
        teacher_id: i64,
        subject_id: i64,
        classroom_id: i64,
        session_id: i64,
        term: Term,
    ) -> ApiResult<()> {
        require_area(actor, Area::AssignmentManagement)?;

        let removed = db::assignments::delete_subject(
            &self.pool,
            teacher_id,
            subject_id,
            classroom_id,
            session_id,
            term,
        )
        .await?;
        if !removed {
            return Err(ApiError::NotFound("subject assignment not found".to_string()));
        }

        self.cache.invalidate_assignments(teacher_id).await;
        info!(teacher_id, subject_id, classroom_id, session_id, %term, "Subject teacher removed");
        self.audit
            .append(
                "teacher_subject_assignment",
                &format!("{}:{}:{}:{}:{}", teacher_id, subject_id, classroom_id, session_id, term),
                "deleted",
                Some(actor.id),
                json!({}),
            )
            .await;
        Ok(())
    }

    pub async fn remove_class_assignment(
        &self,
        actor: &Actor,
        teacher_id: i64,
        classroom_id: i64,
        session_id: i64,
    ) -> ApiResult<()> {
        require_area(actor, Area::AssignmentManagement)?;

        let removed =
            db::assignments::delete_class(&self.pool, teacher_id, classroom_id, session_id).await?;
        if !removed {
            return Err(ApiError::NotFound("class teacher assignment not found".to_string()));
        }

        self.cache.invalidate_assignments(teacher_id).await;
        info!(teacher_id, classroom_id, session_id, "Class teacher removed");
        self.audit
            .append(
                "class_teacher_assignment",
                &format!("{}:{}:{}", teacher_id, classroom_id, session_id),
                "deleted",
                Some(actor.id),
                json!({}),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_non_teacher_never_uploads() {
        let grants = ActiveAssignments {
            subject: vec![],
            class: vec![ClassTeacherAssignment {
                id: uuid::Uuid::new_v4(),
                teacher_id: 1,
                classroom_id: 10,
                session_id: 2024,
                created_at: chrono::Utc::now(),
            }],
        };
        let ctx = AcademicContext::new(2024, Term::First);

        assert!(can_upload(&Actor::teacher(1), 3, 10, ctx, &grants));
        assert!(!can_upload(&Actor::admin(1), 3, 10, ctx, &grants));
        assert!(!can_upload(&Actor { id: 1, role: Role::Sudo }, 3, 10, ctx, &grants));
    }
}
