//! Submission windows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Term, Week};

/// Time range per (session, term, week) during which uploads are accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionWindow {
    pub id: Uuid,
    pub session_id: i64,
    pub term: Term,
    pub week: Week,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    /// Manual open/closed switch set by administrators
    pub is_open: bool,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionWindow {
    /// Manual flag AND `opens_at <= now <= closes_at`
    pub fn accepts_uploads_at(&self, now: DateTime<Utc>) -> bool {
        self.is_open && self.opens_at <= now && now <= self.closes_at
    }
}
