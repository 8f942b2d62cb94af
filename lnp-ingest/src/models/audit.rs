//! Audit log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable record of an action taken on a subject entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub subject_type: String,
    pub subject_id: String,
    pub action: String,
    pub actor_id: Option<i64>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
