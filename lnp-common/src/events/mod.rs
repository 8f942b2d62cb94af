//! Domain events for the lesson-note pipeline
//!
//! Events are broadcast in-process via [`EventBus`]. The notification
//! delivery collaborator subscribes and turns `AdminNotification` /
//! `TeacherNotification` into e-mail, push, etc.; this crate never delivers
//! anything itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// LNP event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LnpEvent {
    /// A version was committed for a lesson note
    NoteSubmitted {
        note_id: Uuid,
        version_id: Uuid,
        teacher_id: i64,
        duplicate: bool,
        timestamp: DateTime<Utc>,
    },

    /// A lesson note was approved or rejected
    NoteReviewed {
        note_id: Uuid,
        version_id: Uuid,
        reviewer_id: i64,
        /// "approved" or "rejected"
        outcome: String,
        timestamp: DateTime<Utc>,
    },

    /// A submission window's manual flag was flipped
    WindowToggled {
        window_id: Uuid,
        is_open: bool,
        actor_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Work item for the admin notification channel
    ///
    /// May be delivered more than once; `dedup_key` is stable across retries.
    AdminNotification {
        dedup_key: String,
        note_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Work item for the teacher notification channel
    TeacherNotification {
        dedup_key: String,
        teacher_id: i64,
        note_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// An audit append failed and was swallowed
    AuditFailed {
        subject_type: String,
        subject_id: String,
        action: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A job exhausted its retries and was moved to the dead letter state
    JobDeadLettered {
        job_id: Uuid,
        kind: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl LnpEvent {
    /// Event type name, matching the serde tag
    pub fn event_type(&self) -> &str {
        match self {
            LnpEvent::NoteSubmitted { .. } => "NoteSubmitted",
            LnpEvent::NoteReviewed { .. } => "NoteReviewed",
            LnpEvent::WindowToggled { .. } => "WindowToggled",
            LnpEvent::AdminNotification { .. } => "AdminNotification",
            LnpEvent::TeacherNotification { .. } => "TeacherNotification",
            LnpEvent::AuditFailed { .. } => "AuditFailed",
            LnpEvent::JobDeadLettered { .. } => "JobDeadLettered",
        }
    }
}

/// Broadcast bus for [`LnpEvent`]s
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// emitters.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LnpEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LnpEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` when nobody is listening, so callers that need delivery
    /// (notification jobs) can retry later.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: LnpEvent) -> Result<usize, broadcast::error::SendError<LnpEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LnpEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(8);
        let event = LnpEvent::WindowToggled {
            window_id: Uuid::new_v4(),
            is_open: true,
            actor_id: 1,
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event).is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let note_id = Uuid::new_v4();

        bus.emit(LnpEvent::AdminNotification {
            dedup_key: "k".into(),
            note_id,
            message: "new lesson note".into(),
            timestamp: Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            LnpEvent::AdminNotification { note_id: got, .. } => assert_eq!(got, note_id),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = LnpEvent::JobDeadLettered {
            job_id: Uuid::nil(),
            kind: "notify_admins".into(),
            error: "boom".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "JobDeadLettered");
        assert_eq!(event.event_type(), "JobDeadLettered");
    }
}
