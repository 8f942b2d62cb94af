//! Write paths must invalidate cached lookups; TTL is never relied on

mod helpers;

use helpers::*;
use std::sync::Arc;

#[tokio::test]
async fn test_toggle_is_visible_immediately() {
    let env = test_env().await;
    let window = define_window(&env, 1, at(16, 0), at(22, 23), false).await;
    let gate = &env.state.windows;

    // Prime the cache with the closed record
    assert!(!gate.is_open(SESSION, ctx().term, week(1), at(17, 9)).await.unwrap());

    let toggled = gate.toggle(window.id, &admin(), at(17, 9)).await.unwrap();
    assert!(toggled.is_open);
    assert_eq!(toggled.updated_by, Some(ADMIN));
    assert!(gate.is_open(SESSION, ctx().term, week(1), at(17, 9)).await.unwrap());

    // Cached record still honours the interval
    assert!(!gate.is_open(SESSION, ctx().term, week(1), at(23, 0)).await.unwrap());
    assert!(!gate.is_open(SESSION, ctx().term, week(1), at(15, 23)).await.unwrap());
}

#[tokio::test]
async fn test_newly_defined_window_replaces_cached_absence() {
    let env = test_env().await;
    let gate = &env.state.windows;

    assert!(!gate.is_open(SESSION, ctx().term, week(5), at(17, 9)).await.unwrap());
    define_window(&env, 5, at(16, 0), at(22, 23), true).await;
    assert!(gate.is_open(SESSION, ctx().term, week(5), at(17, 9)).await.unwrap());
}

#[tokio::test]
async fn test_assignment_changes_are_visible_immediately() {
    let env = test_env().await;
    let authority = &env.state.authority;

    assert!(!authority.can_upload(&teacher(), MATHEMATICS, CLASS_A, ctx()).await.unwrap());

    grant_subject(&env, TEACHER, MATHEMATICS, CLASS_A).await;
    assert!(authority.can_upload(&teacher(), MATHEMATICS, CLASS_A, ctx()).await.unwrap());

    authority
        .remove_subject_assignment(&admin(), TEACHER, MATHEMATICS, CLASS_A, SESSION, ctx().term)
        .await
        .unwrap();
    assert!(!authority.can_upload(&teacher(), MATHEMATICS, CLASS_A, ctx()).await.unwrap());
}

#[tokio::test]
async fn test_pipeline_works_with_cache_backend_down() {
    let env = test_env_with(EnvOptions {
        cache: Some(Arc::new(UnavailableCache)),
        ..EnvOptions::default()
    })
    .await;
    grant_subject(&env, TEACHER, MATHEMATICS, CLASS_A).await;
    let window = define_window(&env, 1, at(16, 0), at(22, 23), false).await;

    let err = env
        .state
        .pipeline
        .upload(upload(teacher(), target(MATHEMATICS, CLASS_A, 1), "plan.pdf", pdf_bytes(1, 0)), at(17, 9))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "submission window closed");

    env.state.windows.toggle(window.id, &admin(), at(17, 9)).await.unwrap();
    let outcome = env
        .state
        .pipeline
        .upload(upload(teacher(), target(MATHEMATICS, CLASS_A, 1), "plan.pdf", pdf_bytes(1, 0)), at(17, 9))
        .await
        .unwrap();
    assert!(outcome.created_note);
}
