use pg_lock_probe::BuiltinScenario;

use crate::support;

const INSERT_FOO: &str = "insert into example_with_unique (value) values ('foo')";

#[tokio::test(flavor = "multi_thread")]
async fn second_insert_of_uncommitted_value_hits_lock_timeout() {
    let Some(db) = support::database().await else {
        return;
    };
    let report = BuiltinScenario::UniqueInsertContention.run(&db.harness).await;
    assert!(report.passed, "{:?}", report.error);
}

#[tokio::test(flavor = "multi_thread")]
async fn value_is_free_again_after_the_holder_rolls_back() {
    let Some(db) = support::database().await else {
        return;
    };
    let harness = &db.harness;
    let fixture = BuiltinScenario::UniqueInsertContention.fixture().unwrap();
    harness.prepare(&fixture).await.unwrap();

    let holder = harness.session_in(&fixture).await.unwrap();
    let contender = harness.session_in(&fixture).await.unwrap();
    holder.begin().await.unwrap();
    holder.execute(INSERT_FOO).await.unwrap();

    let action = harness
        .spawn_contended(contender, ["begin", INSERT_FOO])
        .await
        .unwrap();
    harness.expect_lock_timeout(action).await.unwrap();

    holder.rollback().await.unwrap();
    let retry = harness.session_in(&fixture).await.unwrap();
    let inserted = retry.execute(INSERT_FOO).await.unwrap();
    assert_eq!(inserted.affected(), 1);

    harness.cleanup().await.unwrap();
    harness.teardown(&fixture).await.unwrap();
}
