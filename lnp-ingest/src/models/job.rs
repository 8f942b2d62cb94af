//! Background job records
//!
//! Jobs are persisted in the `jobs` table so queued side effects survive a
//! restart. Payloads are JSON tagged by `kind`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Side effect to run after a committed state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Publish a stored version to the mirror and mark it CDN-available
    ProcessUpload { version_id: Uuid },

    /// Tell reviewers a new version is waiting
    NotifyAdmins {
        note_id: Uuid,
        version_id: Uuid,
        teacher_id: i64,
        duplicate: bool,
    },

    /// Tell the owning teacher about a review outcome
    NotifyTeacher {
        note_id: Uuid,
        teacher_id: i64,
        outcome: String,
        comment: Option<String>,
    },

    AuditAppend {
        subject_type: String,
        subject_id: String,
        action: String,
        actor_id: Option<i64>,
        details: serde_json::Value,
    },
}

impl JobPayload {
    /// Value stored in the `kind` column
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::ProcessUpload { .. } => "process_upload",
            JobPayload::NotifyAdmins { .. } => "notify_admins",
            JobPayload::NotifyTeacher { .. } => "notify_teacher",
            JobPayload::AuditAppend { .. } => "audit_append",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    /// Retries exhausted; waits for an operator
    Dead,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Unix seconds; the job is not picked up before this
    pub available_at: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tag_matches_kind() {
        let payload = JobPayload::NotifyAdmins {
            note_id: Uuid::nil(),
            version_id: Uuid::nil(),
            teacher_id: 4,
            duplicate: false,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], payload.kind());

        let back: JobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(JobStatus::parse("dead"), Some(JobStatus::Dead));
        assert_eq!(JobStatus::parse("failed"), None);
    }
}
