//! Database sessions: one connection, its backend id, and the statements a
//! scenario runs through it.

mod checkpoint;
mod row_set;
mod session;

pub use checkpoint::ControlCheckpoint;
pub use row_set::RowSet;
pub use session::{IsolationLevel, Session, VirtualXid};
