use std::time::{Duration, Instant};

use pg_lock_probe::{
    remaining_sessions, ActionOutcome, BlockOutcome, Fixture, LockFilter, LockMode, ProbeError,
    ProbeSettings,
};

use crate::support;

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_leaves_only_the_control_session() {
    let Some(db) = support::database().await else {
        return;
    };
    let harness = &db.harness;

    let idle = harness.open_session().await.unwrap();
    let in_transaction = harness.open_session().await.unwrap();
    in_transaction.begin().await.unwrap();
    in_transaction.execute("select 1").await.unwrap();
    let pids = [
        idle.backend_id().await.unwrap(),
        in_transaction.backend_id().await.unwrap(),
    ];

    let terminated = harness.cleanup().await.unwrap();
    for pid in pids {
        assert!(terminated.contains(&pid), "{} not terminated", pid);
    }
    assert!(!terminated.contains(&harness.control_backend()));
    assert!(remaining_sessions(harness.control()).await.unwrap().is_empty());
    assert!(!harness.control().is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn unobserved_lock_terminates_the_waiting_backend() {
    let settings = ProbeSettings {
        observe_timeout: Duration::from_millis(300),
        ..ProbeSettings::default()
    };
    let Some(db) = support::database_with(settings).await else {
        return;
    };
    let harness = &db.harness;
    let fixture = Fixture::new("never_blocks")
        .unwrap()
        .table("flows", "id serial");
    harness.prepare(&fixture).await.unwrap();

    let sleeper = harness.session_in(&fixture).await.unwrap();
    let mut action = harness
        .spawn_action(sleeper, ["select pg_sleep(30)"])
        .await
        .unwrap();
    let never = LockFilter::new()
        .backend(action.backend_id())
        .mode(LockMode::AccessExclusive)
        .waiting();

    let err = harness.expect_blocked(&mut action, &never).await.unwrap_err();
    let ProbeError::NotObserved(timeout) = err else {
        panic!("expected NotObserved, got {}", err);
    };
    assert!(timeout.expected.contains("AccessExclusiveLock"));
    assert!(timeout.polls >= 1);
    assert_eq!(timeout.subject_outcome, None);

    let outcome = action
        .join_within(harness.settings().join_timeout)
        .await
        .unwrap();
    assert_eq!(outcome, ActionOutcome::Blocked(BlockOutcome::Terminated));

    harness.cleanup().await.unwrap();
    harness.teardown(&fixture).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_statement_ends_observation_early() {
    let settings = ProbeSettings {
        observe_timeout: Duration::from_secs(10),
        ..ProbeSettings::default()
    };
    let Some(db) = support::database_with(settings).await else {
        return;
    };
    let harness = &db.harness;
    let fixture = Fixture::new("finishes_at_once")
        .unwrap()
        .table("flows", "id serial");
    harness.prepare(&fixture).await.unwrap();

    let session = harness.session_in(&fixture).await.unwrap();
    let mut action = harness
        .spawn_action(session, ["select count(*) from flows"])
        .await
        .unwrap();
    let never = LockFilter::new()
        .backend(action.backend_id())
        .mode(LockMode::AccessExclusive)
        .waiting();

    let started = Instant::now();
    let err = harness.expect_blocked(&mut action, &never).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());

    let ProbeError::NotObserved(timeout) = err else {
        panic!("expected NotObserved, got {}", err);
    };
    assert_eq!(timeout.subject_outcome.as_deref(), Some("statement completed"));
    assert!(ProbeError::NotObserved(timeout)
        .to_string()
        .contains("statement finished without waiting: statement completed"));
    assert!(action.is_finished());

    harness.cleanup().await.unwrap();
    harness.teardown(&fixture).await.unwrap();
}
