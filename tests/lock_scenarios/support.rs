//! Shared setup: connect a harness, one test at a time.

#![allow(dead_code)]

use std::sync::OnceLock;

use pg_lock_probe::{ConnectionConfig, Harness, ProbeSettings};
use tokio::sync::{Mutex, MutexGuard};

/// Cleanup sweeps every backend on the database, so tests in this binary
/// must not overlap.
static DATABASE: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub harness: Harness,
    _exclusive: MutexGuard<'static, ()>,
}

/// `None` when no database is configured.
pub async fn database() -> Option<TestDb> {
    let settings = ProbeSettings::from_env().expect("LOCK_PROBE_* settings");
    database_with(settings).await
}

pub async fn database_with(settings: ProbeSettings) -> Option<TestDb> {
    if std::env::var("PGHOST").map_or(true, |host| host.trim().is_empty()) {
        eprintln!("PGHOST not set; skipping live lock scenario");
        return None;
    }
    let exclusive = DATABASE.get_or_init(|| Mutex::new(())).lock().await;
    let config = ConnectionConfig::from_env().expect("PG* connection settings");
    let harness = Harness::connect(config, settings)
        .await
        .expect("connect to the database under test");
    harness.cleanup().await.expect("sweep leftovers from earlier tests");
    Some(TestDb {
        harness,
        _exclusive: exclusive,
    })
}
