mod action;
mod config;
mod error;
mod fixture;
mod lock;
mod scenario;
mod session;

pub use action::{ActionOutcome, BlockedAction};
pub use config::{ConnectionConfig, ProbeSettings};
pub use error::{BlockOutcome, ObservationTimeout, ProbeError};
pub use fixture::{remaining_sessions, sweep, terminate_others, Fixture};
pub use lock::{
    FilterQuery, LockFilter, LockMode, LockObservation, LockObserver, LockSource, Observed,
    PollBudget, ScriptedLockSource, UnknownLockMode,
};
pub use scenario::{
    referenced_table_lock, BuiltinScenario, Harness, ScenarioReport,
    REFERENCE_SHARE_ROW_EXCLUSIVE_SINCE,
};
pub use session::{ControlCheckpoint, IsolationLevel, RowSet, Session, VirtualXid};
