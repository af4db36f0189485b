//! A statement expected to block, running on its own task.
//!
//! The orchestrating task keeps polling the lock table while the action's
//! statement waits inside the server. The action ends one of three ways: the
//! statement completes, it hits its `lock_timeout`, or its backend is
//! terminated. The last two are `ActionOutcome::Blocked`, not errors.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{BlockOutcome, ProbeError};
use crate::session::{RowSet, Session};

/// How a blocked action finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Every statement ran; rows from the last one.
    Completed(RowSet),
    /// A statement stopped waiting on a lock.
    Blocked(BlockOutcome),
}

impl ActionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ActionOutcome::Completed(_))
    }

    pub fn block_outcome(&self) -> Option<BlockOutcome> {
        match self {
            ActionOutcome::Blocked(outcome) => Some(*outcome),
            ActionOutcome::Completed(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ActionOutcome::Completed(_) => "statement completed".to_string(),
            ActionOutcome::Blocked(outcome) => outcome.to_string(),
        }
    }
}

/// Handle to a session whose statements run on a spawned task.
///
/// Follows the spawn / join pattern of a background worker: the session is
/// moved into the task, and the handle keeps its backend id so the
/// orchestrator can filter the lock table or terminate it. Dropping an
/// unfinished handle aborts the task.
pub struct BlockedAction {
    backend_id: i32,
    statements: Vec<String>,
    handle: Option<JoinHandle<Result<ActionOutcome, ProbeError>>>,
}

impl BlockedAction {
    /// Set `lock_timeout` on `session`, then run `statements` in order on a
    /// new task.
    pub async fn spawn<I, S>(
        session: Session,
        statements: I,
        lock_timeout: Duration,
    ) -> Result<Self, ProbeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let statements: Vec<String> = statements.into_iter().map(Into::into).collect();
        let backend_id = session.backend_id().await?;
        session.set_lock_timeout(lock_timeout).await?;

        let script = statements.clone();
        let handle = tokio::spawn(async move {
            let outcome = run_statements(&session, &script).await;
            session.close().await;
            outcome
        });
        info!(
            backend_id,
            statements = statements.len(),
            lock_timeout_ms = lock_timeout.as_millis() as u64,
            "blocked action spawned"
        );

        Ok(BlockedAction {
            backend_id,
            statements,
            handle: Some(handle),
        })
    }

    pub fn backend_id(&self) -> i32 {
        self.backend_id
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// The outcome, if the task has already finished. The handle is
    /// consumed, so later joins report the action as already joined.
    pub async fn take_finished(&mut self) -> Option<Result<ActionOutcome, ProbeError>> {
        if !self.handle.as_ref()?.is_finished() {
            return None;
        }
        let handle = self.handle.take()?;
        Some(match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(e.into()),
        })
    }

    /// Wait for the task, however long the statement takes.
    pub async fn join(mut self) -> Result<ActionOutcome, ProbeError> {
        match self.handle.take() {
            Some(handle) => handle.await?,
            None => Err(ProbeError::TaskFailed("action already joined".into())),
        }
    }

    /// Wait at most `timeout`; a task still running after that is aborted.
    pub async fn join_within(mut self, timeout: Duration) -> Result<ActionOutcome, ProbeError> {
        let Some(mut handle) = self.handle.take() else {
            return Err(ProbeError::TaskFailed("action already joined".into()));
        };
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => {
                let outcome = joined?;
                if let Ok(outcome) = &outcome {
                    debug!(backend_id = self.backend_id, outcome = %outcome.describe(), "blocked action finished");
                }
                outcome
            }
            Err(_) => {
                handle.abort();
                Err(ProbeError::ActionStalled {
                    backend_id: self.backend_id,
                    waited: timeout,
                })
            }
        }
    }
}

impl Drop for BlockedAction {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                debug!(backend_id = self.backend_id, "aborting unjoined blocked action");
                handle.abort();
            }
        }
    }
}

async fn run_statements(session: &Session, statements: &[String]) -> Result<ActionOutcome, ProbeError> {
    let mut last = RowSet::default();
    for statement in statements {
        match session.execute(statement).await {
            Ok(rows) => last = rows,
            Err(ProbeError::ExpectedBlock(outcome)) => {
                info!(outcome = %outcome, statement = %statement.trim(), "statement stopped waiting");
                return Ok(ActionOutcome::Blocked(outcome));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(ActionOutcome::Completed(last))
}
