use std::time::{Duration, Instant};

use pg_lock_probe::{BlockOutcome, IsolationLevel, ProbeError};

use crate::support;

#[tokio::test(flavor = "multi_thread")]
async fn backend_id_is_stable_across_round_trips() {
    let Some(db) = support::database().await else {
        return;
    };
    let session = db.harness.open_session().await.unwrap();

    let first = session.fetch_backend_id().await.unwrap();
    let second = session.fetch_backend_id().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(session.backend_id().await.unwrap(), first);
    assert_ne!(first, db.harness.control_backend());
}

#[tokio::test(flavor = "multi_thread")]
async fn virtual_xid_is_fixed_for_the_open_transaction() {
    let Some(db) = support::database().await else {
        return;
    };
    let session = db.harness.open_session().await.unwrap();

    session.begin_with(IsolationLevel::RepeatableRead).await.unwrap();
    session.execute("select 1").await.unwrap();
    let first = session.virtual_xid().await.unwrap();
    session.execute("select 2").await.unwrap();
    let second = session.virtual_xid().await.unwrap();
    session.rollback().await.unwrap();

    assert_eq!(first, second);
    assert!(first.as_str().contains('/'), "unexpected vxid {}", first);
}

#[tokio::test(flavor = "multi_thread")]
async fn terminated_session_reports_termination() {
    let Some(db) = support::database().await else {
        return;
    };
    let session = db.harness.open_session().await.unwrap();
    let pid = session.backend_id().await.unwrap();

    assert!(db.harness.control().terminate(pid).await.unwrap());

    let deadline = Instant::now() + Duration::from_secs(5);
    let err = loop {
        match session.execute("select 1").await {
            Err(e) => break e,
            Ok(_) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Ok(_) => panic!("session {} survived termination", pid),
        }
    };
    assert!(
        matches!(err, ProbeError::ExpectedBlock(BlockOutcome::Terminated)),
        "unexpected error: {}",
        err
    );

    assert!(session.is_closed());
    tokio::time::timeout(Duration::from_secs(5), session.close())
        .await
        .expect("closing a terminated session hung");
}

#[tokio::test(flavor = "multi_thread")]
async fn open_session_closes_and_leaves_the_server() {
    let Some(db) = support::database().await else {
        return;
    };
    let session = db.harness.open_session().await.unwrap();
    let pid = session.backend_id().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), session.close())
        .await
        .expect("close hung");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let gone = db
            .harness
            .control()
            .execute(&format!(
                "select 1 from pg_stat_activity where pid = {}",
                pid
            ))
            .await
            .unwrap()
            .is_empty();
        if gone {
            break;
        }
        assert!(Instant::now() < deadline, "backend {} still connected", pid);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn genuine_query_errors_are_not_block_outcomes() {
    let Some(db) = support::database().await else {
        return;
    };
    let err = db
        .harness
        .control()
        .execute("select * from lock_probe_no_such_table")
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::Query { .. }), "{}", err);
    assert!(!err.is_expected());
}

#[tokio::test(flavor = "multi_thread")]
async fn control_checkpoint_exposes_multixact_counters() {
    let Some(db) = support::database().await else {
        return;
    };
    let checkpoint = db.harness.control().control_checkpoint().await.unwrap();
    assert!(!checkpoint.next_xid.is_empty());
    assert!(checkpoint.next_multixact_id >= 1);
}
