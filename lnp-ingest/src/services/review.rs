//! Review state machine
//!
//! ```text
//! (upload) -> pending --approve--> approved
//!                     --reject---> rejected
//! approved/rejected --(new upload)--> pending
//! ```
//!
//! Transitions only leave `pending`; the status check and the stamp are one
//! conditional UPDATE, so of two concurrent reviews exactly one wins.

use chrono::{DateTime, Utc};
use lnp_common::events::{EventBus, LnpEvent};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::job_queue::RetryableJobQueue;
use super::rate_limiter::{RateAction, RateLimiter};
use crate::db;
use crate::db::notes::ReviewStamp;
use crate::error::{ApiError, ApiResult};
use crate::models::{Actor, JobPayload, LessonNote, LessonNoteVersion, NoteStatus};

/// Whether the teacher may still change the note
pub fn editable(note: &LessonNote) -> bool {
    note.is_editable()
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub note: LessonNote,
    pub version: LessonNoteVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkApproveReport {
    pub approved: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
}

pub struct ReviewStateMachine {
    pool: SqlitePool,
    rate_limiter: RateLimiter,
    jobs: Arc<RetryableJobQueue>,
    events: EventBus,
}

impl ReviewStateMachine {
    pub fn new(pool: SqlitePool, rate_limiter: RateLimiter, jobs: Arc<RetryableJobQueue>, events: EventBus) -> Self {
        Self {
            pool,
            rate_limiter,
            jobs,
            events,
        }
    }

    pub async fn approve(
        &self,
        note_id: Uuid,
        comment: Option<&str>,
        reviewer: &Actor,
        now: DateTime<Utc>,
    ) -> ApiResult<ReviewOutcome> {
        self.authorize(reviewer, now).await?;
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());
        self.transition(note_id, NoteStatus::Approved, comment, reviewer, now).await
    }

    pub async fn reject(
        &self,
        note_id: Uuid,
        comment: &str,
        reviewer: &Actor,
        now: DateTime<Utc>,
    ) -> ApiResult<ReviewOutcome> {
        self.authorize(reviewer, now).await?;
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(ApiError::BadRequest("a comment is required to reject a lesson note".to_string()));
        }
        self.transition(note_id, NoteStatus::Rejected, Some(comment), reviewer, now).await
    }

    /// Approve every pending note in `note_ids`
    ///
    /// Missing and non-pending notes are skipped, not errors. Counts as one
    /// review against the rate limit.
    pub async fn bulk_approve(
        &self,
        note_ids: &[Uuid],
        reviewer: &Actor,
        now: DateTime<Utc>,
    ) -> ApiResult<BulkApproveReport> {
        self.authorize(reviewer, now).await?;

        let mut report = BulkApproveReport::default();
        for &note_id in note_ids {
            if report.approved.contains(&note_id) || report.skipped.contains(&note_id) {
                continue;
            }
            match self.transition(note_id, NoteStatus::Approved, None, reviewer, now).await {
                Ok(_) => report.approved.push(note_id),
                Err(ApiError::PreconditionFailed(_)) | Err(ApiError::NotFound(_)) => report.skipped.push(note_id),
                Err(e) => return Err(e),
            }
        }

        info!(
            reviewer_id = reviewer.id,
            approved = report.approved.len(),
            skipped = report.skipped.len(),
            "Bulk approve finished"
        );
        Ok(report)
    }

    async fn authorize(&self, reviewer: &Actor, now: DateTime<Utc>) -> ApiResult<()> {
        self.rate_limiter.hit(reviewer, &RateAction::Review, now).await?;
        if !reviewer.can_approve() {
            return Err(ApiError::Forbidden("only administrators can review lesson notes".to_string()));
        }
        Ok(())
    }

    async fn transition(
        &self,
        note_id: Uuid,
        outcome: NoteStatus,
        comment: Option<&str>,
        reviewer: &Actor,
        now: DateTime<Utc>,
    ) -> ApiResult<ReviewOutcome> {
        let stamp = ReviewStamp {
            outcome,
            comment,
            reviewer_id: reviewer.id,
            at: now,
        };

        let Some((note, version)) = db::notes::stamp_review(&self.pool, note_id, &stamp).await? else {
            // Distinguish why nothing changed
            return match db::notes::get_note(&self.pool, note_id).await? {
                None => Err(ApiError::NotFound(format!("lesson note {} not found", note_id))),
                Some(note) if note.current_version_id.is_none() => Err(ApiError::PreconditionFailed(
                    "lesson note has no submitted version to review".to_string(),
                )),
                Some(note) => Err(ApiError::PreconditionFailed(format!(
                    "lesson note is {}; only pending notes can be reviewed",
                    note.status
                ))),
            };
        };

        info!(
            note_id = %note.id,
            version_id = %version.id,
            reviewer_id = reviewer.id,
            outcome = %outcome,
            "Lesson note reviewed"
        );

        self.events.emit_lossy(LnpEvent::NoteReviewed {
            note_id: note.id,
            version_id: version.id,
            reviewer_id: reviewer.id,
            outcome: outcome.to_string(),
            timestamp: now,
        });

        let payloads = [
            JobPayload::AuditAppend {
                subject_type: "lesson_note".to_string(),
                subject_id: note.id.to_string(),
                action: outcome.to_string(),
                actor_id: Some(reviewer.id),
                details: json!({
                    "version_id": version.id,
                    "version_number": version.version_number,
                    "comment": comment,
                }),
            },
            JobPayload::NotifyTeacher {
                note_id: note.id,
                teacher_id: note.slot.teacher_id,
                outcome: outcome.to_string(),
                comment: comment.map(str::to_string),
            },
        ];
        for payload in payloads {
            let kind = payload.kind();
            if let Err(e) = self.jobs.enqueue(payload, now).await {
                warn!(note_id = %note.id, kind, error = %e, "Failed to enqueue side effect");
            }
        }

        Ok(ReviewOutcome { note, version })
    }
}
