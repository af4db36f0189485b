use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

pub(crate) const CONTROL_CHECKPOINT_QUERY: &str = "select next_xid::text, \
next_multixact_id::text, next_multi_offset::text \
from pg_catalog.pg_control_checkpoint()";

/// Counters from the last checkpoint record in `pg_control`.
///
/// `next_multi_offset` tracks how much of the multixact members space has
/// been handed out, which grows with every shared row lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCheckpoint {
    /// Rendered as `epoch:xid` by the server.
    pub next_xid: String,
    pub next_multixact_id: u64,
    pub next_multi_offset: u64,
}

impl ControlCheckpoint {
    pub fn parse(next_xid: &str, next_multixact_id: &str, next_multi_offset: &str) -> Result<Self, ProbeError> {
        let counter = |name: &str, raw: &str| -> Result<u64, ProbeError> {
            raw.trim().parse().map_err(|_| ProbeError::UnexpectedOutcome {
                expected: format!("numeric {}", name),
                actual: raw.to_string(),
            })
        };
        Ok(ControlCheckpoint {
            next_xid: next_xid.to_string(),
            next_multixact_id: counter("next_multixact_id", next_multixact_id)?,
            next_multi_offset: counter("next_multi_offset", next_multi_offset)?,
        })
    }
}
