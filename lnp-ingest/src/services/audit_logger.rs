//! Best-effort audit trail
//!
//! [`AuditLogger::append`] never fails its caller. A failed write is logged
//! at error level and published as [`LnpEvent::AuditFailed`] for whoever
//! watches the side channel.

use lnp_common::events::{EventBus, LnpEvent};
use lnp_common::time;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, error};

use crate::db::audit::{self, NewAuditEntry};
use crate::error::ApiResult;
use crate::models::AuditLogEntry;

#[derive(Clone)]
pub struct AuditLogger {
    pool: SqlitePool,
    events: EventBus,
}

impl AuditLogger {
    pub fn new(pool: SqlitePool, events: EventBus) -> Self {
        Self { pool, events }
    }

    /// Append an entry, swallowing any failure
    pub async fn append(
        &self,
        subject_type: &str,
        subject_id: &str,
        action: &str,
        actor_id: Option<i64>,
        details: Value,
    ) {
        if let Err(e) = self
            .try_append(subject_type, subject_id, action, actor_id, &details, None)
            .await
        {
            error!(
                subject_type,
                subject_id,
                action,
                error = %e,
                "Audit append failed"
            );
            self.events.emit_lossy(LnpEvent::AuditFailed {
                subject_type: subject_type.to_string(),
                subject_id: subject_id.to_string(),
                action: action.to_string(),
                error: e.to_string(),
                timestamp: time::now(),
            });
        }
    }

    /// Append an entry and report failure
    ///
    /// With a `dedup_key`, replays are no-ops and return `Ok(None)`.
    pub async fn try_append(
        &self,
        subject_type: &str,
        subject_id: &str,
        action: &str,
        actor_id: Option<i64>,
        details: &Value,
        dedup_key: Option<&str>,
    ) -> ApiResult<Option<i64>> {
        let entry = NewAuditEntry {
            subject_type,
            subject_id,
            action,
            actor_id,
            details,
            dedup_key,
        };
        let id = audit::insert(&self.pool, &entry, time::now()).await?;
        debug!(subject_type, subject_id, action, ?id, "Audit entry appended");
        Ok(id)
    }

    pub async fn entries_for(&self, subject_type: &str, subject_id: &str) -> ApiResult<Vec<AuditLogEntry>> {
        Ok(audit::entries_for(&self.pool, subject_type, subject_id).await?)
    }
}
