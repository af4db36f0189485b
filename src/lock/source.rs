use std::future::Future;

use tracing::debug;

use super::{LockFilter, LockMode, LockObservation};
use crate::error::ProbeError;
use crate::session::Session;

/// Anything that can produce a snapshot of the lock table.
///
/// `Session` reads `pg_catalog.pg_locks`; `ScriptedLockSource` replays canned
/// snapshots so the observer can be exercised without a server.
pub trait LockSource {
    /// Lock rows matching `filter`, excluding the caller's own backend.
    fn snapshot(
        &self,
        filter: &LockFilter,
    ) -> impl Future<Output = Result<Vec<LockObservation>, ProbeError>>;
}

impl LockSource for Session {
    async fn snapshot(&self, filter: &LockFilter) -> Result<Vec<LockObservation>, ProbeError> {
        let query = filter.to_query();
        let rows = self.query_typed(query.sql(), &query.params()).await?;
        let mut locks = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_mode: String = row.get("mode");
            let Ok(mode) = raw_mode.parse::<LockMode>() else {
                // SIReadLock and friends never take part in table-level contention.
                debug!(mode = %raw_mode, "skipping lock row with non-table mode");
                continue;
            };
            locks.push(LockObservation {
                pid: row.get("pid"),
                locktype: row.get("locktype"),
                relation: row.get("relation"),
                virtualxid: row.get("virtualxid"),
                mode,
                granted: row.get("granted"),
            });
        }
        Ok(locks)
    }
}
