use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::lock::PollBudget;
use crate::session::Session;

// Background processes have a null client_port; every client connection,
// socket or TCP, has one.
const OTHER_BACKENDS_QUERY: &str = "select pid from pg_catalog.pg_stat_activity \
where pid <> pg_catalog.pg_backend_pid() \
and datname = pg_catalog.current_database() \
and client_port is not null \
order by pid";

const TERMINATE_OTHERS_QUERY: &str = "select pid, pg_catalog.pg_terminate_backend(pid) \
from pg_catalog.pg_stat_activity \
where pid <> pg_catalog.pg_backend_pid() \
and datname = pg_catalog.current_database() \
and client_port is not null \
order by pid";

/// Client backends on the current database other than `session`'s own.
pub async fn remaining_sessions(session: &Session) -> Result<Vec<i32>, ProbeError> {
    let rows = session.query_typed(OTHER_BACKENDS_QUERY, &[]).await?;
    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Signal every other client backend on the current database. Returns the
/// pids that were signalled.
pub async fn terminate_others(session: &Session) -> Result<Vec<i32>, ProbeError> {
    let rows = session.query_typed(TERMINATE_OTHERS_QUERY, &[]).await?;
    let pids: Vec<i32> = rows
        .iter()
        .filter(|row| row.get::<_, bool>(1))
        .map(|row| row.get(0))
        .collect();
    for pid in &pids {
        debug!(backend_id = pid, "terminated backend");
    }
    Ok(pids)
}

/// Terminate every other backend and wait until none is left.
///
/// Termination is asynchronous on the server side, so the sweep re-checks
/// (and re-signals) until `pg_stat_activity` is empty or the budget is spent.
pub async fn sweep(session: &Session, budget: PollBudget) -> Result<Vec<i32>, ProbeError> {
    let started = Instant::now();
    let deadline = started + budget.timeout;
    let mut terminated = Vec::new();
    let mut polls = 0u32;

    loop {
        polls += 1;
        for pid in terminate_others(session).await? {
            if !terminated.contains(&pid) {
                terminated.push(pid);
            }
        }
        let remaining = remaining_sessions(session).await?;
        if remaining.is_empty() {
            info!(
                terminated = terminated.len(),
                polls,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "cleanup sweep complete"
            );
            return Ok(terminated);
        }

        let out_of_polls = budget.max_polls.is_some_and(|max| polls >= max);
        let now = Instant::now();
        if out_of_polls || now >= deadline {
            warn!(?remaining, "cleanup sweep left backends running");
            return Err(ProbeError::CleanupIncomplete { remaining });
        }
        tokio::time::sleep(budget.interval.min(deadline - now)).await;
    }
}
