mod task;

pub use task::{ActionOutcome, BlockedAction};
