use pg_lock_probe::{
    referenced_table_lock, BuiltinScenario, LockMode, REFERENCE_SHARE_ROW_EXCLUSIVE_SINCE,
};

use crate::support;

#[tokio::test(flavor = "multi_thread")]
async fn adding_a_plain_column_ignores_readers_of_other_tables() {
    let Some(db) = support::database().await else {
        return;
    };
    let report = BuiltinScenario::AlterTableAddColumn.run(&db.harness).await;
    assert!(report.passed, "{:?}", report.error);
}

#[tokio::test(flavor = "multi_thread")]
async fn adding_a_reference_locks_the_referenced_table() {
    let Some(db) = support::database().await else {
        return;
    };
    let version = db.harness.control().server_version_num().await.unwrap();
    let report = BuiltinScenario::AlterTableAddReference.run(&db.harness).await;
    assert!(report.passed, "{:?}", report.error);

    // AccessExclusive queues behind the reader; ShareRowExclusive is granted.
    let mode = referenced_table_lock(version);
    let granted = version >= REFERENCE_SHARE_ROW_EXCLUSIVE_SINCE;
    assert_eq!(granted, mode == LockMode::ShareRowExclusive);
    assert!(!report.observed.is_empty());
    for lock in &report.observed {
        assert_eq!(lock.mode, mode);
        assert_eq!(lock.granted, granted);
        assert_eq!(
            lock.relation.as_deref(),
            Some("lock_probe_alter_table_add_reference.flows")
        );
    }
}
