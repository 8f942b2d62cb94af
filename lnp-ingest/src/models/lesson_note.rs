//! Lesson notes and their versions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::SlotKey;

/// Review status shared by notes and versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Pending,
    Approved,
    Rejected,
}

impl NoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NoteStatus::Pending => "pending",
            NoteStatus::Approved => "approved",
            NoteStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for NoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NoteStatus::Pending),
            "approved" => Ok(NoteStatus::Approved),
            "rejected" => Ok(NoteStatus::Rejected),
            other => Err(format!("unknown note status '{}'", other)),
        }
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lesson note per slot; never deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonNote {
    pub id: Uuid,
    pub slot: SlotKey,
    pub status: NoteStatus,
    /// Always the most recently committed version
    pub current_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LessonNote {
    /// A note accepts review (and counts as open for edits) only while pending
    pub fn is_editable(&self) -> bool {
        self.status == NoteStatus::Pending
    }
}

/// Best-effort document metadata; every field may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub page_count: Option<i64>,
    pub author: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Append-only file revision of a lesson note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonNoteVersion {
    pub id: Uuid,
    pub lesson_note_id: Uuid,
    pub version_number: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_hash: String,
    pub uploaded_by: i64,
    pub status: NoteStatus,
    pub reviewer_comment: Option<String>,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub scan_result: String,
    pub mime_type: String,
    pub is_duplicate: bool,
    pub metadata: DocumentMetadata,
    pub cdn_available: bool,
    pub thumbnail_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fully validated upload ready for the commit transaction
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_hash: String,
    pub uploaded_by: i64,
    pub scan_result: String,
    pub mime_type: String,
    pub is_duplicate: bool,
    pub metadata: DocumentMetadata,
    pub thumbnail_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AcademicContext, Term, Week};

    fn note(status: NoteStatus) -> LessonNote {
        LessonNote {
            id: Uuid::new_v4(),
            slot: SlotKey {
                teacher_id: 1,
                subject_id: 2,
                classroom_id: 3,
                context: AcademicContext::new(2024, Term::First),
                week: Week::new(1).unwrap(),
            },
            status,
            current_version_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_editable_iff_pending() {
        assert!(note(NoteStatus::Pending).is_editable());
        assert!(!note(NoteStatus::Approved).is_editable());
        assert!(!note(NoteStatus::Rejected).is_editable());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [NoteStatus::Pending, NoteStatus::Approved, NoteStatus::Rejected] {
            assert_eq!(status.as_str().parse::<NoteStatus>().unwrap(), status);
        }
        assert!("draft".parse::<NoteStatus>().is_err());
    }
}
