use tracing::{debug, info, warn};

use crate::action::{ActionOutcome, BlockedAction};
use crate::config::{ConnectionConfig, ProbeSettings};
use crate::error::{BlockOutcome, ProbeError};
use crate::fixture::{self, Fixture};
use crate::lock::{LockFilter, LockObserver, Observed, PollBudget};
use crate::session::{RowSet, Session};

/// Scenario orchestrator.
///
/// Owns a control session that applies fixtures, polls the lock table,
/// terminates backends and sweeps up after each scenario. The control
/// session is never a participant in the contention it observes.
pub struct Harness {
    config: ConnectionConfig,
    settings: ProbeSettings,
    control: Session,
    control_backend: i32,
}

impl Harness {
    pub async fn connect(
        config: ConnectionConfig,
        settings: ProbeSettings,
    ) -> Result<Self, ProbeError> {
        let control = Session::open(&config).await?;
        let control_backend = control.backend_id().await?;
        info!(
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            control_backend,
            "harness connected"
        );
        Ok(Harness {
            config,
            settings,
            control,
            control_backend,
        })
    }

    /// Connection and timing both taken from the environment.
    pub async fn from_env() -> Result<Self, ProbeError> {
        Self::connect(ConnectionConfig::from_env()?, ProbeSettings::from_env()?).await
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn control(&self) -> &Session {
        &self.control
    }

    pub fn control_backend(&self) -> i32 {
        self.control_backend
    }

    pub async fn open_session(&self) -> Result<Session, ProbeError> {
        Session::open(&self.config).await
    }

    /// A new session whose search path is the fixture's schema.
    pub async fn session_in(&self, fixture: &Fixture) -> Result<Session, ProbeError> {
        let session = self.open_session().await?;
        session.use_schema(fixture).await?;
        Ok(session)
    }

    /// Drop and recreate the fixture's schema on a short-lived session, so
    /// the control session's search path is left alone.
    pub async fn prepare(&self, fixture: &Fixture) -> Result<(), ProbeError> {
        let setup = fixture.setup_sql()?;
        let session = self.open_session().await?;
        let applied = match session.set_lock_timeout(self.settings.lock_timeout).await {
            Ok(()) => session.execute(&setup).await.map(|_| ()),
            Err(e) => Err(e),
        };
        session.close().await;
        applied?;
        debug!(schema = fixture.schema(), "fixture prepared");
        Ok(())
    }

    pub async fn teardown(&self, fixture: &Fixture) -> Result<(), ProbeError> {
        self.control.execute(&fixture.teardown_sql()).await?;
        debug!(schema = fixture.schema(), "fixture dropped");
        Ok(())
    }

    /// Observer over the control session, with the control backend excluded.
    pub fn observer(&self) -> LockObserver<'_, Session> {
        LockObserver::new(&self.control, PollBudget::from_settings(&self.settings))
            .excluding_self(self.control_backend)
    }

    /// Run `statements` on a new task, with the safety-net `lock_timeout`.
    pub async fn spawn_action<I, S>(
        &self,
        session: Session,
        statements: I,
    ) -> Result<BlockedAction, ProbeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BlockedAction::spawn(session, statements, self.settings.lock_timeout).await
    }

    /// Run `statements` on a new task with the short contention `lock_timeout`,
    /// for scenarios where timing out is the expected result.
    pub async fn spawn_contended<I, S>(
        &self,
        session: Session,
        statements: I,
    ) -> Result<BlockedAction, ProbeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BlockedAction::spawn(session, statements, self.settings.contention_lock_timeout).await
    }

    /// Wait for `filter` to match while `action` is pending.
    ///
    /// Polling stops early once the action has finished, and its outcome is
    /// reported in the `NotObserved` error. If the action is still running
    /// when the deadline passes, its backend is terminated before the error
    /// is returned, so a hung statement cannot leak into the next scenario.
    pub async fn expect_blocked(
        &self,
        action: &mut BlockedAction,
        filter: &LockFilter,
    ) -> Result<Observed, ProbeError> {
        let polled = self
            .observer()
            .poll_while(filter, || !action.is_finished())
            .await;
        let mut timeout = match polled {
            Err(ProbeError::NotObserved(timeout)) => timeout,
            other => return other,
        };

        let backend_id = action.backend_id();
        match action.take_finished().await {
            Some(outcome) => {
                let outcome = match outcome {
                    Ok(outcome) => outcome.describe(),
                    Err(e) => e.to_string(),
                };
                warn!(backend_id, outcome = %outcome, "statement finished without the expected lock");
                timeout.subject_outcome = Some(outcome);
            }
            None => {
                warn!(backend_id, "expected lock not observed, terminating action backend");
                if let Err(e) = self.control.terminate(backend_id).await {
                    warn!(backend_id, error = %e, "could not terminate action backend");
                }
            }
        }
        Err(ProbeError::NotObserved(timeout))
    }

    /// Run `statement` on `session` under the contention `lock_timeout` and
    /// require it to finish without waiting that long.
    pub async fn expect_completes(
        &self,
        session: &Session,
        statement: &str,
    ) -> Result<RowSet, ProbeError> {
        session
            .set_lock_timeout(self.settings.contention_lock_timeout)
            .await?;
        match session.execute(statement).await {
            Ok(rows) => Ok(rows),
            Err(ProbeError::ExpectedBlock(outcome)) => Err(ProbeError::UnexpectedOutcome {
                expected: "statement completes without blocking".to_string(),
                actual: outcome.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Join `action` and require it to have given up on its lock timeout.
    pub async fn expect_lock_timeout(&self, action: BlockedAction) -> Result<(), ProbeError> {
        match action.join_within(self.settings.join_timeout).await? {
            ActionOutcome::Blocked(BlockOutcome::LockTimeout) => Ok(()),
            other => Err(ProbeError::UnexpectedOutcome {
                expected: "lock timeout".to_string(),
                actual: other.describe(),
            }),
        }
    }

    /// Terminate the action's backend and collect its outcome.
    pub async fn release(&self, action: BlockedAction) -> Result<ActionOutcome, ProbeError> {
        if !action.is_finished() {
            self.control.terminate(action.backend_id()).await?;
        }
        action.join_within(self.settings.join_timeout).await
    }

    /// Terminate every other backend on the database and wait until they are gone.
    pub async fn cleanup(&self) -> Result<Vec<i32>, ProbeError> {
        let budget = PollBudget::new(self.settings.cleanup_timeout)
            .with_interval(self.settings.poll_interval);
        fixture::sweep(&self.control, budget).await
    }
}
