use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::{LockFilter, LockObservation, LockSource};
use crate::error::ProbeError;

/// Lock source that replays a fixed sequence of lock-table snapshots.
///
/// Each call to `snapshot` consumes the next frame; once the script runs out
/// the last frame repeats. Rows are filtered in memory with the same
/// `LockFilter` semantics the SQL path uses.
pub struct ScriptedLockSource {
    state: Mutex<Script>,
}

struct Script {
    frames: VecDeque<Vec<LockObservation>>,
    last: Vec<LockObservation>,
    polls: u32,
}

impl ScriptedLockSource {
    pub fn new(frames: Vec<Vec<LockObservation>>) -> Self {
        ScriptedLockSource {
            state: Mutex::new(Script {
                frames: frames.into(),
                last: Vec::new(),
                polls: 0,
            }),
        }
    }

    /// A source whose lock table never changes.
    pub fn constant(locks: Vec<LockObservation>) -> Self {
        Self::new(vec![locks])
    }

    /// Number of snapshots taken so far.
    pub fn polls(&self) -> u32 {
        self.script().polls
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // The script is plain data, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_frame(&self) -> Vec<LockObservation> {
        let mut script = self.script();
        script.polls += 1;
        if let Some(frame) = script.frames.pop_front() {
            script.last = frame;
        }
        script.last.clone()
    }
}

impl Default for ScriptedLockSource {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl LockSource for ScriptedLockSource {
    async fn snapshot(&self, filter: &LockFilter) -> Result<Vec<LockObservation>, ProbeError> {
        Ok(self
            .next_frame()
            .into_iter()
            .filter(|lock| filter.matches(lock))
            .collect())
    }
}
