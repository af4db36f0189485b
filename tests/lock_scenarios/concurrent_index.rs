use pg_lock_probe::{ActionOutcome, BuiltinScenario, IsolationLevel, LockFilter, LockMode};

use crate::support;

const BUILD_INDEX: &str =
    "create unique index concurrently index_other_flows_value on other_flows using btree (id, value)";

#[tokio::test(flavor = "multi_thread")]
async fn index_build_completes_alongside_read_committed_readers() {
    let Some(db) = support::database().await else {
        return;
    };
    let report = BuiltinScenario::ConcurrentIndexWithReaders.run(&db.harness).await;
    assert!(report.passed, "{:?}", report.error);
}

#[tokio::test(flavor = "multi_thread")]
async fn index_build_waits_on_the_virtual_xid_of_an_older_snapshot() {
    let Some(db) = support::database().await else {
        return;
    };
    let report = BuiltinScenario::ConcurrentIndexWaitsForSnapshot
        .run(&db.harness)
        .await;
    assert!(report.passed, "{:?}", report.error);

    assert!(!report.observed.is_empty());
    for lock in &report.observed {
        assert_eq!(lock.locktype, "virtualxid");
        assert_eq!(lock.mode, LockMode::Share);
        assert!(!lock.granted);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn index_build_resumes_once_the_old_snapshot_commits() {
    let Some(db) = support::database().await else {
        return;
    };
    let harness = &db.harness;
    let fixture = BuiltinScenario::ConcurrentIndexWaitsForSnapshot
        .fixture()
        .unwrap();
    harness.prepare(&fixture).await.unwrap();

    let holder = harness.session_in(&fixture).await.unwrap();
    let builder = harness.session_in(&fixture).await.unwrap();
    holder.begin_with(IsolationLevel::RepeatableRead).await.unwrap();
    holder.execute("select * from flows").await.unwrap();
    let vxid = holder.virtual_xid().await.unwrap();

    let mut action = harness.spawn_action(builder, [BUILD_INDEX]).await.unwrap();
    let expected = LockFilter::new()
        .backend(action.backend_id())
        .virtual_xid(&vxid)
        .mode(LockMode::Share)
        .waiting();
    harness.expect_blocked(&mut action, &expected).await.unwrap();

    holder.commit().await.unwrap();
    let outcome = action
        .join_within(harness.settings().join_timeout)
        .await
        .unwrap();
    assert!(matches!(outcome, ActionOutcome::Completed(_)), "{:?}", outcome);

    let index = harness
        .control()
        .execute(&format!(
            "select indexname from pg_indexes where schemaname = '{}' and indexname = 'index_other_flows_value'",
            fixture.schema()
        ))
        .await
        .unwrap();
    assert_eq!(index.len(), 1);

    harness.cleanup().await.unwrap();
    harness.teardown(&fixture).await.unwrap();
}
