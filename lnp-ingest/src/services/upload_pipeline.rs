//! Lesson-note upload pipeline
//!
//! Stage 0 is the per-teacher rate limit. Then, in order:
//!
//! | # | Stage | Kind | Failure |
//! |---|-------|------|---------|
//! | 1 | assignment authority | hard | `Forbidden` |
//! | 2 | submission window | hard | `WindowClosed` |
//! | 3 | slot lookup (new note or new version) | - | - |
//! | 4 | size cap | hard | `PayloadTooLarge` |
//! | 5 | content-signature allow-list | hard | `UnsupportedMediaType` |
//! | 6 | virus scan | hard | `SecurityRejected` |
//! | 7 | SHA-256 + storage path | - | - |
//! | 8 | duplicate flag | - | - |
//! | 9 | metadata extraction | soft | nulls |
//! | 10 | thumbnail | soft | none |
//! | 11 | storage write + commit transaction | atomic | `TransientStorageFailure` |
//! | 12 | enqueue side-effect jobs | fire-and-forget | logged |
//!
//! Nothing is written before stage 10, and no row exists before stage 11
//! commits; a failed hard gate leaves no trace.

use chrono::{DateTime, Utc};
use lnp_common::events::{EventBus, LnpEvent};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::authority::AssignmentAuthority;
use super::content_type::{self, DocumentKind};
use super::hashing::{build_storage_path, sha256_hex};
use super::job_queue::RetryableJobQueue;
use super::metadata_extractor::MetadataExtractor;
use super::rate_limiter::{RateAction, RateLimiter};
use super::scanner::{scan_with_timeout, ScanVerdict, VirusScanner};
use super::storage::FileStorage;
use super::thumbnail;
use super::window_gate::SubmissionWindowGate;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    AcademicContext, Actor, DocumentMetadata, JobPayload, LessonNote, LessonNoteVersion, NewVersion,
    SlotKey, Week,
};
use crate::utils::retry_on_lock;

const MIB: u64 = 1024 * 1024;

/// Where an upload is going; resolved by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTarget {
    pub subject_id: i64,
    pub classroom_id: i64,
    pub context: AcademicContext,
    pub week: Week,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub actor: Actor,
    pub target: UploadTarget,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub note: LessonNote,
    pub version: LessonNoteVersion,
    pub created_note: bool,
    pub duplicate: bool,
}

pub struct PipelineLimits {
    pub max_upload_bytes: u64,
    pub scan_timeout: Duration,
    /// Budget for `retry_on_lock` around the commit transaction
    pub lock_wait_ms: u64,
}

pub struct UploadPipeline {
    pool: SqlitePool,
    authority: Arc<AssignmentAuthority>,
    gate: Arc<SubmissionWindowGate>,
    rate_limiter: RateLimiter,
    scanner: Arc<dyn VirusScanner>,
    storage: Arc<dyn FileStorage>,
    jobs: Arc<RetryableJobQueue>,
    events: EventBus,
    limits: PipelineLimits,
}

impl UploadPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        authority: Arc<AssignmentAuthority>,
        gate: Arc<SubmissionWindowGate>,
        rate_limiter: RateLimiter,
        scanner: Arc<dyn VirusScanner>,
        storage: Arc<dyn FileStorage>,
        jobs: Arc<RetryableJobQueue>,
        events: EventBus,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            pool,
            authority,
            gate,
            rate_limiter,
            scanner,
            storage,
            jobs,
            events,
            limits,
        }
    }

    pub fn size_limit_message(&self) -> String {
        format!("file exceeds {}MB", self.limits.max_upload_bytes / MIB)
    }

    pub async fn upload(&self, request: UploadRequest, now: DateTime<Utc>) -> ApiResult<UploadOutcome> {
        let UploadRequest {
            actor,
            target,
            file_name,
            bytes,
        } = request;

        // Stage 0: every attempt counts, accepted or not
        self.rate_limiter.hit(&actor, &RateAction::Upload, now).await?;

        // Stage 1
        if !actor.is_teacher() {
            return Err(ApiError::Forbidden("only teachers can upload lesson notes".to_string()));
        }
        if !self
            .authority
            .can_upload(&actor, target.subject_id, target.classroom_id, target.context)
            .await?
        {
            debug!(teacher_id = actor.id, subject_id = target.subject_id, classroom_id = target.classroom_id, "Upload refused: no assignment");
            return Err(ApiError::Forbidden(
                "you are not assigned to this subject and class".to_string(),
            ));
        }

        // Stage 2
        let ctx = target.context;
        if !self.gate.is_open(ctx.session_id, ctx.term, target.week, now).await? {
            debug!(teacher_id = actor.id, session_id = ctx.session_id, term = %ctx.term, week = %target.week, "Upload refused: window closed");
            return Err(ApiError::WindowClosed("submission window closed".to_string()));
        }

        // Stage 3: creation itself is deferred to the commit transaction
        let slot = SlotKey {
            teacher_id: actor.id,
            subject_id: target.subject_id,
            classroom_id: target.classroom_id,
            context: ctx,
            week: target.week,
        };
        let existing = db::notes::find_by_slot(&self.pool, &slot).await?;
        debug!(teacher_id = actor.id, existing_note = ?existing.as_ref().map(|n| n.id), "Slot resolved");

        // Stage 4
        if bytes.len() as u64 > self.limits.max_upload_bytes {
            return Err(ApiError::PayloadTooLarge(self.size_limit_message()));
        }

        // Stage 5
        let kind = content_type::detect(&bytes).map_err(ApiError::UnsupportedMediaType)?;

        // Stage 6
        let verdict = match scan_with_timeout(self.scanner.as_ref(), &bytes, self.limits.scan_timeout).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(teacher_id = actor.id, scanner = self.scanner.name(), error = %e, "Virus scan failed");
                return Err(ApiError::SecurityRejected("virus scan unavailable".to_string()));
            }
        };
        if let ScanVerdict::Infected { signature } = &verdict {
            warn!(teacher_id = actor.id, signature = %signature, file_name = %file_name, "Upload rejected by virus scan");
            return Err(ApiError::SecurityRejected(format!(
                "file rejected by virus scan ({})",
                signature
            )));
        }

        // Stage 7
        let hash = sha256_hex(&bytes);
        let file_path = build_storage_path(ctx.session_id, ctx.term, target.week, actor.id, &hash, kind.extension());

        // Stage 8
        let duplicate = match &existing {
            Some(note) => db::notes::has_version_with_hash(&self.pool, note.id, &hash).await?,
            None => false,
        };
        debug!(hash = %hash, duplicate, "Content hashed");

        // Stage 9
        let metadata = match MetadataExtractor::extract(kind, &bytes) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(hash = %hash, error = %e, "No document metadata");
                DocumentMetadata::default()
            }
        };

        // Stages 11 then 10: the thumbnail only ever sits beside a stored document
        self.storage.put(&file_path, &bytes).await?;
        let thumbnail_path = self.store_thumbnail(kind, &file_name, &metadata, &file_path).await;

        let new_version = NewVersion {
            file_path,
            file_name,
            file_size: bytes.len() as i64,
            file_hash: hash,
            uploaded_by: actor.id,
            scan_result: verdict.label(),
            mime_type: kind.mime_type().to_string(),
            is_duplicate: duplicate,
            metadata,
            thumbnail_path,
        };

        let pool = &self.pool;
        let slot_ref = &slot;
        let version_ref = &new_version;
        let committed = retry_on_lock("upload commit", self.limits.lock_wait_ms, move || {
            db::notes::commit_upload(pool, slot_ref, version_ref, now)
        })
        .await?;

        info!(
            note_id = %committed.note.id,
            version_id = %committed.version.id,
            version_number = committed.version.version_number,
            teacher_id = actor.id,
            hash = %committed.version.file_hash,
            created_note = committed.created_note,
            duplicate = committed.version.is_duplicate,
            "Lesson note version committed"
        );

        self.events.emit_lossy(LnpEvent::NoteSubmitted {
            note_id: committed.note.id,
            version_id: committed.version.id,
            teacher_id: actor.id,
            duplicate: committed.version.is_duplicate,
            timestamp: now,
        });

        // Stage 12
        self.enqueue_side_effects(&committed.note, &committed.version, committed.created_note, now)
            .await;

        Ok(UploadOutcome {
            duplicate: committed.version.is_duplicate,
            note: committed.note,
            version: committed.version,
            created_note: committed.created_note,
        })
    }

    /// Run the pipeline on bytes already transferred through a signed upload URL
    ///
    /// The staged object is consumed whatever the outcome: committed bytes
    /// live on under their content path, rejected bytes are discarded.
    pub async fn upload_staged(
        &self,
        actor: Actor,
        target: UploadTarget,
        staged_path: &str,
        file_name: String,
        now: DateTime<Utc>,
    ) -> ApiResult<UploadOutcome> {
        if !staged_path.starts_with(&staging_prefix(actor.id)) {
            return Err(ApiError::Forbidden("staged file belongs to another actor".to_string()));
        }
        let bytes = self.storage.get(staged_path).await?;
        let result = self
            .upload(
                UploadRequest {
                    actor,
                    target,
                    file_name,
                    bytes,
                },
                now,
            )
            .await;

        if let Err(e) = self.storage.delete(staged_path).await {
            warn!(path = %staged_path, error = %e, "Failed to remove staged upload");
        }
        result
    }

    async fn store_thumbnail(
        &self,
        kind: DocumentKind,
        file_name: &str,
        metadata: &DocumentMetadata,
        file_path: &str,
    ) -> Option<String> {
        let card = match thumbnail::render_card(kind, file_name, metadata) {
            Ok(card) => card,
            Err(e) => {
                debug!(error = %e, "Thumbnail skipped");
                return None;
            }
        };

        let path = thumbnail::thumbnail_path_for(file_path);
        match self.storage.put(&path, &card).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path, error = %e, "Thumbnail write failed");
                None
            }
        }
    }

    async fn enqueue_side_effects(
        &self,
        note: &LessonNote,
        version: &LessonNoteVersion,
        created_note: bool,
        now: DateTime<Utc>,
    ) {
        let payloads = [
            JobPayload::ProcessUpload { version_id: version.id },
            JobPayload::NotifyAdmins {
                note_id: note.id,
                version_id: version.id,
                teacher_id: note.slot.teacher_id,
                duplicate: version.is_duplicate,
            },
            JobPayload::AuditAppend {
                subject_type: "lesson_note".to_string(),
                subject_id: note.id.to_string(),
                action: if created_note { "created" } else { "version_uploaded" }.to_string(),
                actor_id: Some(version.uploaded_by),
                details: json!({
                    "version_id": version.id,
                    "version_number": version.version_number,
                    "file_hash": version.file_hash,
                    "file_name": version.file_name,
                    "duplicate": version.is_duplicate,
                }),
            },
        ];

        for payload in payloads {
            let kind = payload.kind();
            if let Err(e) = self.jobs.enqueue(payload, now).await {
                warn!(note_id = %note.id, kind, error = %e, "Failed to enqueue side effect");
            }
        }
    }
}

/// Storage prefix for an actor's signed-URL uploads awaiting the pipeline
pub fn staging_prefix(actor_id: i64) -> String {
    format!("staging/{}/", actor_id)
}
