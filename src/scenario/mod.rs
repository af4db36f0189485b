//! Scenario orchestration: the `Harness` that drives sessions and the lock
//! observer, and the catalog of built-in lock scenarios.

mod builtin;
mod harness;
mod report;

pub use builtin::{referenced_table_lock, BuiltinScenario, REFERENCE_SHARE_ROW_EXCLUSIVE_SINCE};
pub use harness::Harness;
pub use report::ScenarioReport;
