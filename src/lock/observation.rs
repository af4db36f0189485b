use std::fmt;

use serde::{Deserialize, Serialize};

use super::LockMode;

/// One row of `pg_catalog.pg_locks`, as seen by a single poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockObservation {
    /// Backend holding or awaiting the lock. `None` for prepared transactions.
    pub pid: Option<i32>,
    pub locktype: String,
    /// `relation::regclass` rendered as text, for relation locks.
    pub relation: Option<String>,
    /// The virtual xid being locked, for `virtualxid` locks.
    pub virtualxid: Option<String>,
    pub mode: LockMode,
    pub granted: bool,
}

impl LockObservation {
    /// A queued request rather than a held lock.
    pub fn is_waiting(&self) -> bool {
        !self.granted
    }
}

impl fmt::Display for LockObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "pid={} ", pid)?,
            None => write!(f, "pid=- ")?,
        }
        write!(f, "{} {} granted={}", self.locktype, self.mode, self.granted)?;
        if let Some(relation) = &self.relation {
            write!(f, " relation={}", relation)?;
        }
        if let Some(vxid) = &self.virtualxid {
            write!(f, " virtualxid={}", vxid)?;
        }
        Ok(())
    }
}
