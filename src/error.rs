use std::error::Error;
use std::fmt;
use std::time::Duration;

use tokio_postgres::error::SqlState;

use crate::lock::LockObservation;

/// Why a statement that was expected to block stopped waiting.
///
/// Both outcomes are produced by the engine itself, never by the harness:
/// a configured `lock_timeout` elapsing, or another session calling
/// `pg_terminate_backend` on the waiting backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOutcome {
    /// SQLSTATE 55P03 (`lock_not_available`).
    LockTimeout,
    /// SQLSTATE 57P01 (`admin_shutdown`), or the connection was closed under us.
    Terminated,
}

impl BlockOutcome {
    /// Classify an engine error code. `closed` is whether the client saw the
    /// connection drop without an error response.
    pub fn classify(code: Option<&SqlState>, closed: bool) -> Option<BlockOutcome> {
        match code {
            Some(code) if *code == SqlState::LOCK_NOT_AVAILABLE => Some(BlockOutcome::LockTimeout),
            Some(code) if *code == SqlState::ADMIN_SHUTDOWN => Some(BlockOutcome::Terminated),
            Some(_) => None,
            None if closed => Some(BlockOutcome::Terminated),
            None => None,
        }
    }

    pub fn from_pg(err: &tokio_postgres::Error) -> Option<BlockOutcome> {
        Self::classify(err.code(), err.is_closed())
    }
}

impl fmt::Display for BlockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockOutcome::LockTimeout => write!(f, "lock timeout"),
            BlockOutcome::Terminated => write!(f, "backend terminated"),
        }
    }
}

/// The observer's deadline passed without a matching lock row.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTimeout {
    /// Description of the lock state that was being waited for.
    pub expected: String,
    /// The subject's locks as seen on the final poll (any mode, any grant state).
    pub observed: Vec<LockObservation>,
    pub polls: u32,
    pub elapsed: Duration,
    /// How the subject's statement ended, when it finished before the
    /// expected lock state ever showed up.
    pub subject_outcome: Option<String>,
}

impl fmt::Display for ObservationTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected lock state not observed after {} polls in {:?}: expected {}; observed ",
            self.polls, self.elapsed, self.expected
        )?;
        if self.observed.is_empty() {
            write!(f, "nothing")?;
        }
        for (i, row) in self.observed.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{}]", row)?;
        }
        if let Some(outcome) = &self.subject_outcome {
            write!(f, "; statement finished without waiting: {}", outcome)?;
        }
        Ok(())
    }
}

/// Error type for every harness operation.
#[derive(Debug)]
pub enum ProbeError {
    /// Configuration could not be read (bad environment value).
    Config(String),
    /// A session could not be established.
    Connection(tokio_postgres::Error),
    /// A statement failed for a reason other than an expected block outcome.
    Query {
        statement: String,
        source: tokio_postgres::Error,
    },
    /// The statement stopped waiting on a lock: lock timeout or forced termination.
    ExpectedBlock(BlockOutcome),
    /// The observer's deadline elapsed with no matching lock row.
    NotObserved(ObservationTimeout),
    /// `virtual_xid` was asked for outside an open transaction.
    NoVirtualXid,
    /// A schema or table name that is not a plain lower-case identifier.
    InvalidIdentifier(String),
    /// A scenario step finished differently than the scenario requires.
    UnexpectedOutcome { expected: String, actual: String },
    /// A blocked action did not finish within its join timeout.
    ActionStalled { backend_id: i32, waited: Duration },
    /// A blocked action's task panicked or was aborted.
    TaskFailed(String),
    /// Backends still connected after the cleanup deadline.
    CleanupIncomplete { remaining: Vec<i32> },
}

impl ProbeError {
    /// Wrap an engine error from `statement`, routing lock timeouts and
    /// terminations to `ExpectedBlock`.
    pub fn from_query(statement: &str, source: tokio_postgres::Error) -> Self {
        match BlockOutcome::from_pg(&source) {
            Some(outcome) => ProbeError::ExpectedBlock(outcome),
            None => ProbeError::Query {
                statement: statement.to_string(),
                source,
            },
        }
    }

    pub fn block_outcome(&self) -> Option<BlockOutcome> {
        match self {
            ProbeError::ExpectedBlock(outcome) => Some(*outcome),
            _ => None,
        }
    }

    /// True for the two error kinds that are recoverable by design.
    pub fn is_expected(&self) -> bool {
        matches!(self, ProbeError::ExpectedBlock(_) | ProbeError::NotObserved(_))
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Config(msg) => write!(f, "configuration error: {}", msg),
            ProbeError::Connection(e) => write!(f, "connection failed: {}", e),
            ProbeError::Query { statement, source } => {
                write!(f, "query failed: {} (statement: {})", source, statement.trim())
            }
            ProbeError::ExpectedBlock(outcome) => write!(f, "statement stopped waiting: {}", outcome),
            ProbeError::NotObserved(timeout) => write!(f, "{}", timeout),
            ProbeError::NoVirtualXid => {
                write!(f, "no virtual transaction id: session has no open transaction")
            }
            ProbeError::InvalidIdentifier(name) => write!(f, "invalid identifier: {:?}", name),
            ProbeError::UnexpectedOutcome { expected, actual } => {
                write!(f, "unexpected outcome: expected {}, got {}", expected, actual)
            }
            ProbeError::ActionStalled { backend_id, waited } => write!(
                f,
                "blocked action on backend {} still running after {:?}",
                backend_id, waited
            ),
            ProbeError::TaskFailed(msg) => write!(f, "action task failed: {}", msg),
            ProbeError::CleanupIncomplete { remaining } => {
                write!(f, "cleanup left backends running: {:?}", remaining)
            }
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProbeError::Connection(e) => Some(e),
            ProbeError::Query { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for ProbeError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProbeError::TaskFailed(err.to_string())
    }
}
