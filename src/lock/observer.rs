use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{LockFilter, LockObservation, LockSource};
use crate::config::ProbeSettings;
use crate::error::{ObservationTimeout, ProbeError};

/// Bounds on a polling loop: a wall-clock deadline, the sleep between polls,
/// and an optional cap on the number of polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub timeout: Duration,
    pub interval: Duration,
    pub max_polls: Option<u32>,
}

impl PollBudget {
    pub fn new(timeout: Duration) -> Self {
        PollBudget {
            timeout,
            interval: Duration::from_millis(10),
            max_polls: None,
        }
    }

    pub fn from_settings(settings: &ProbeSettings) -> Self {
        PollBudget {
            timeout: settings.observe_timeout,
            interval: settings.poll_interval,
            max_polls: settings.max_polls,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }
}

/// The first non-empty poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub rows: Vec<LockObservation>,
    pub polls: u32,
    pub elapsed: Duration,
}

/// Polls a `LockSource` until a filter matches or the budget runs out.
///
/// An empty poll is never an error; only running out of budget is, and the
/// resulting `ProbeError::NotObserved` carries the subject's locks from one
/// last, broader snapshot.
pub struct LockObserver<'a, S: LockSource> {
    source: &'a S,
    budget: PollBudget,
    self_backend: Option<i32>,
}

impl<'a, S: LockSource> LockObserver<'a, S> {
    pub fn new(source: &'a S, budget: PollBudget) -> Self {
        LockObserver {
            source,
            budget,
            self_backend: None,
        }
    }

    /// Never report locks held by the observing backend itself.
    pub fn excluding_self(mut self, backend_id: i32) -> Self {
        self.self_backend = Some(backend_id);
        self
    }

    pub fn budget(&self) -> PollBudget {
        self.budget
    }

    pub async fn poll_until(&self, filter: &LockFilter) -> Result<Observed, ProbeError> {
        self.poll_while(filter, || true).await
    }

    /// Like `poll_until`, but also gives up once `active` returns false,
    /// e.g. when the statement expected to wait has already finished.
    pub async fn poll_while<F>(&self, filter: &LockFilter, active: F) -> Result<Observed, ProbeError>
    where
        F: Fn() -> bool,
    {
        let filter = match self.self_backend {
            Some(pid) => filter.clone().excluding(pid),
            None => filter.clone(),
        };
        let started = Instant::now();
        let deadline = started + self.budget.timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let rows = self.source.snapshot(&filter).await?;
            if !rows.is_empty() {
                let elapsed = started.elapsed();
                info!(
                    expected = %filter.describe(),
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "observed expected lock state"
                );
                return Ok(Observed {
                    rows,
                    polls,
                    elapsed,
                });
            }

            if !active() {
                debug!(polls, "subject went away before the expected lock state");
                break;
            }
            let out_of_polls = self.budget.max_polls.is_some_and(|max| polls >= max);
            let now = Instant::now();
            if out_of_polls || now >= deadline {
                break;
            }
            debug!(polls, "no matching lock yet");
            tokio::time::sleep(self.budget.interval.min(deadline - now)).await;
        }

        let observed = self.source.snapshot(&filter.diagnostic_scope()).await?;
        let timeout = ObservationTimeout {
            expected: filter.describe(),
            observed,
            polls,
            elapsed: started.elapsed(),
            subject_outcome: None,
        };
        warn!(%timeout, "lock observation timed out");
        Err(ProbeError::NotObserved(timeout))
    }
}
