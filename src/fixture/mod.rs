//! Scenario isolation: namespaced schema setup before, backend sweep after.

mod cleanup;
mod fixture;

pub use cleanup::{remaining_sessions, sweep, terminate_others};
pub use fixture::Fixture;
