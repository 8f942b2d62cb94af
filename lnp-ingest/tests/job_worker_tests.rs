//! Background job integration tests
//!
//! Side effects of committed uploads and reviews, driven deterministically
//! through `run_due`.

mod helpers;

use chrono::Duration;
use helpers::*;
use lnp_common::events::LnpEvent;
use lnp_ingest::db;
use lnp_ingest::models::{JobStatus, NoteStatus};
use lnp_ingest::services::job_queue::{LEASE_SECS, MAX_ATTEMPTS};
use lnp_ingest::ApiError;

async fn uploaded(env: &TestEnv) -> lnp_ingest::services::UploadOutcome {
    grant_subject(env, TEACHER, MATHEMATICS, CLASS_A).await;
    open_week(env, 1).await;
    env.state
        .pipeline
        .upload(upload(teacher(), target(MATHEMATICS, CLASS_A, 1), "plan.pdf", pdf_bytes(2, 0)), at(17, 9))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_upload_side_effects_complete() {
    let mut env = test_env().await;
    let outcome = uploaded(&env).await;

    let summary = env.state.jobs.run_due(at(17, 9)).await.unwrap();
    assert_eq!(summary.done, 3);
    assert_eq!(summary.dead, 0);

    // Published to the mirror
    let version = db::notes::get_version(&env.state.db, outcome.version.id).await.unwrap().unwrap();
    assert!(version.cdn_available);
    assert!(env.dir.path().join("mirror").join(&version.file_path).exists());

    // Audit row for the creation
    let trail = env
        .state
        .audit
        .entries_for("lesson_note", &outcome.note.id.to_string())
        .await
        .unwrap();
    assert!(trail.iter().any(|e| e.action == "created" && e.actor_id == Some(TEACHER)));

    // Admin notification on the bus
    let mut saw_admin_notice = false;
    while let Ok(event) = env.events.try_recv() {
        if let LnpEvent::AdminNotification { note_id, dedup_key, .. } = event {
            assert_eq!(note_id, outcome.note.id);
            assert_eq!(dedup_key, format!("admins:{}", outcome.version.id));
            saw_admin_notice = true;
        }
    }
    assert!(saw_admin_notice);
}

#[tokio::test]
async fn test_audit_job_replay_is_idempotent() {
    let env = test_env().await;
    let outcome = uploaded(&env).await;
    env.state.jobs.run_due(at(17, 9)).await.unwrap();

    // Simulate redelivery after a crash between side effect and mark_done
    sqlx::query("UPDATE jobs SET status = 'queued' WHERE kind = 'audit_append'")
        .execute(&env.state.db)
        .await
        .unwrap();
    env.state.jobs.run_due(at(17, 9)).await.unwrap();

    let trail = env
        .state
        .audit
        .entries_for("lesson_note", &outcome.note.id.to_string())
        .await
        .unwrap();
    assert_eq!(trail.iter().filter(|e| e.action == "created").count(), 1);
}

#[tokio::test]
async fn test_undeliverable_notification_dead_letters_after_backoff() {
    let env = test_env().await;
    let outcome = uploaded(&env).await;

    // No consumer on the bus from here on
    let TestEnv { dir: _dir, state, events } = env;
    drop(events);

    let t0 = at(17, 9);
    let first = state.jobs.run_due(t0).await.unwrap();
    assert_eq!(first.done, 2);
    assert_eq!(first.retried, 1);

    // Not yet due
    assert_eq!(state.jobs.run_due(t0 + Duration::seconds(9)).await.unwrap().retried, 0);

    let second = state.jobs.run_due(t0 + Duration::seconds(10)).await.unwrap();
    assert_eq!(second.retried, 1);

    let third = state.jobs.run_due(t0 + Duration::seconds(40)).await.unwrap();
    assert_eq!(third.dead, 1);

    let dead = state.jobs.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload.kind(), "notify_admins");
    assert_eq!(dead[0].attempts, MAX_ATTEMPTS);
    assert!(dead[0].last_error.is_some());

    // Never retried again on its own
    let later = state.jobs.run_due(t0 + Duration::hours(1)).await.unwrap();
    assert_eq!(later.dead + later.retried + later.done, 0);

    // The committed upload is untouched by the failure
    let note = db::notes::get_note(&state.db, outcome.note.id).await.unwrap().unwrap();
    assert_eq!(note.status, NoteStatus::Pending);
    assert_eq!(note.current_version_id, Some(outcome.version.id));

    // Operator requeue, with a consumer attached this time
    let _rx = state.event_bus.subscribe();
    let job = state.jobs.requeue_dead(dead[0].id, t0 + Duration::hours(1)).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 0);
    let after = state.jobs.run_due(t0 + Duration::hours(1)).await.unwrap();
    assert_eq!(after.done, 1);
    assert!(state.jobs.dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unrecorded_outcome_does_not_strand_the_pass() {
    let env = test_env().await;
    let outcome = uploaded(&env).await;

    // Recording completion of the publish job fails; the others must still run
    sqlx::query(
        r#"
        CREATE TRIGGER fail_publish_done BEFORE UPDATE OF status ON jobs
        WHEN NEW.status = 'done' AND OLD.kind = 'process_upload'
        BEGIN
            SELECT RAISE(ABORT, 'disk I/O error');
        END
        "#,
    )
    .execute(&env.state.db)
    .await
    .unwrap();

    let t0 = at(17, 9);
    let first = env.state.jobs.run_due(t0).await.unwrap();
    assert_eq!(first.done, 2);
    assert_eq!(first.unrecorded, 1);

    let running = db::jobs::list_by_status(&env.state.db, JobStatus::Running).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].payload.kind(), "process_upload");

    sqlx::query("DROP TRIGGER fail_publish_done")
        .execute(&env.state.db)
        .await
        .unwrap();

    // Lease still held
    let early = env.state.jobs.run_due(t0 + Duration::seconds(60)).await.unwrap();
    assert_eq!(early.released + early.done, 0);

    let recovered = env.state.jobs.run_due(t0 + Duration::seconds(LEASE_SECS)).await.unwrap();
    assert_eq!(recovered.released, 1);
    assert_eq!(recovered.done, 1);

    assert!(db::jobs::list_by_status(&env.state.db, JobStatus::Running).await.unwrap().is_empty());
    let version = db::notes::get_version(&env.state.db, outcome.version.id).await.unwrap().unwrap();
    assert!(version.cdn_available);
}

#[tokio::test]
async fn test_requeue_requires_dead_job() {
    let env = test_env().await;
    uploaded(&env).await;

    let queued = db::jobs::list_by_status(&env.state.db, JobStatus::Queued).await.unwrap();
    let err = env
        .state
        .jobs
        .requeue_dead(queued[0].id, at(17, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_review_notifies_teacher() {
    let mut env = test_env().await;
    let outcome = uploaded(&env).await;
    env.state.jobs.run_due(at(17, 9)).await.unwrap();
    while env.events.try_recv().is_ok() {}

    env.state
        .review
        .reject(outcome.note.id, "Add objectives", &admin(), at(18, 10))
        .await
        .unwrap();
    let summary = env.state.jobs.run_due(at(18, 10)).await.unwrap();
    assert_eq!(summary.done, 2);

    let mut message = None;
    while let Ok(event) = env.events.try_recv() {
        if let LnpEvent::TeacherNotification { teacher_id, message: m, .. } = event {
            assert_eq!(teacher_id, TEACHER);
            message = Some(m);
        }
    }
    assert_eq!(message.as_deref(), Some("Your lesson note was rejected: Add objectives"));

    let trail = env
        .state
        .audit
        .entries_for("lesson_note", &outcome.note.id.to_string())
        .await
        .unwrap();
    let rejected = trail.iter().find(|e| e.action == "rejected").unwrap();
    assert_eq!(rejected.actor_id, Some(ADMIN));
    assert_eq!(rejected.details["comment"], "Add objectives");
}
