//! Lock-table observation: what a lock row looks like, how to select the
//! ones a scenario cares about, and how to wait for them.

mod filter;
mod in_memory;
mod mode;
mod observation;
mod observer;
mod source;

pub use filter::{FilterQuery, LockFilter};
pub use in_memory::ScriptedLockSource;
pub use mode::{LockMode, UnknownLockMode};
pub use observation::LockObservation;
pub use observer::{LockObserver, Observed, PollBudget};
pub use source::LockSource;
