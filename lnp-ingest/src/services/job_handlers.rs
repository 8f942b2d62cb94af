//! Handlers for the pipeline's job kinds
//!
//! All of them are safe to run twice:
//! - mirror publishing rewrites the same content-addressed object
//! - notifications carry a dedup key stable across retries
//! - audit appends are keyed by the job id

use async_trait::async_trait;
use lnp_common::events::{EventBus, LnpEvent};
use lnp_common::time;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::audit_logger::AuditLogger;
use super::job_queue::{JobError, JobHandler};
use super::storage::FileStorage;
use crate::db;
use crate::models::{Job, JobPayload};

pub struct PipelineJobHandler {
    pool: SqlitePool,
    storage: Arc<dyn FileStorage>,
    mirror: Arc<dyn FileStorage>,
    audit: AuditLogger,
    events: EventBus,
}

impl PipelineJobHandler {
    pub fn new(
        pool: SqlitePool,
        storage: Arc<dyn FileStorage>,
        mirror: Arc<dyn FileStorage>,
        audit: AuditLogger,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            storage,
            mirror,
            audit,
            events,
        }
    }

    async fn publish_version(&self, version_id: Uuid) -> Result<(), JobError> {
        let version = db::notes::get_version(&self.pool, version_id)
            .await
            .map_err(|e| JobError::Retryable(e.to_string()))?
            .ok_or_else(|| JobError::Permanent(format!("version {} not found", version_id)))?;

        if !self.mirror.exists(&version.file_path).await.unwrap_or(false) {
            let bytes = self
                .storage
                .get(&version.file_path)
                .await
                .map_err(|e| JobError::Retryable(e.to_string()))?;
            self.mirror
                .put(&version.file_path, &bytes)
                .await
                .map_err(|e| JobError::Retryable(e.to_string()))?;
        }

        if let Some(thumb) = &version.thumbnail_path {
            // Preview is optional; a missing card does not block publishing
            match self.storage.get(thumb).await {
                Ok(bytes) => {
                    if let Err(e) = self.mirror.put(thumb, &bytes).await {
                        warn!(version_id = %version_id, error = %e, "Thumbnail mirror failed");
                    }
                }
                Err(e) => warn!(version_id = %version_id, error = %e, "Thumbnail unreadable"),
            }
        }

        db::notes::mark_cdn_available(&self.pool, version_id)
            .await
            .map_err(|e| JobError::Retryable(e.to_string()))?;
        info!(version_id = %version_id, path = %version.file_path, "Version published to mirror");
        Ok(())
    }

    /// Hand a notification to the delivery collaborator
    fn notify(&self, event: LnpEvent) -> Result<(), JobError> {
        let event_type = event.event_type().to_string();
        match self.events.emit(event) {
            Ok(receivers) => {
                debug!(event_type, receivers, "Notification published");
                Ok(())
            }
            Err(_) => Err(JobError::Retryable(format!(
                "no notification consumer attached for {}",
                event_type
            ))),
        }
    }
}

#[async_trait]
impl JobHandler for PipelineJobHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        match &job.payload {
            JobPayload::ProcessUpload { version_id } => self.publish_version(*version_id).await,

            JobPayload::NotifyAdmins {
                note_id,
                version_id,
                teacher_id,
                duplicate,
            } => {
                let message = if *duplicate {
                    format!(
                        "Teacher {} re-submitted identical content for lesson note {}",
                        teacher_id, note_id
                    )
                } else {
                    format!("Teacher {} submitted a new version of lesson note {}", teacher_id, note_id)
                };
                self.notify(LnpEvent::AdminNotification {
                    dedup_key: format!("admins:{}", version_id),
                    note_id: *note_id,
                    message,
                    timestamp: time::now(),
                })
            }

            JobPayload::NotifyTeacher {
                note_id,
                teacher_id,
                outcome,
                comment,
            } => {
                let message = match comment {
                    Some(comment) => format!("Your lesson note was {}: {}", outcome, comment),
                    None => format!("Your lesson note was {}", outcome),
                };
                self.notify(LnpEvent::TeacherNotification {
                    dedup_key: format!("teacher:{}", job.id),
                    teacher_id: *teacher_id,
                    note_id: *note_id,
                    message,
                    timestamp: time::now(),
                })
            }

            JobPayload::AuditAppend {
                subject_type,
                subject_id,
                action,
                actor_id,
                details,
            } => {
                let dedup_key = format!("job:{}", job.id);
                self.audit
                    .try_append(subject_type, subject_id, action, *actor_id, details, Some(&dedup_key))
                    .await
                    .map(|_| ())
                    .map_err(|e| JobError::Retryable(e.to_string()))
            }
        }
    }
}
