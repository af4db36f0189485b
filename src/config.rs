//! Connection parameters and harness timing.
//!
//! Both are read from the environment so the harness can point at any
//! reachable instance. `from_lookup` takes the variable source as a closure
//! so parsing is testable without touching the process environment.

use std::time::Duration;

use crate::error::ProbeError;

/// Where the database under test lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub application_name: String,
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,
            application_name: "lock-probe".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    /// Read `PGHOST`, `PGPORT`, `PGDATABASE`, `PGUSER` and `PGPASSWORD`.
    pub fn from_env() -> Result<Self, ProbeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProbeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ConnectionConfig::default();
        if let Some(host) = non_empty(lookup("PGHOST")) {
            config.host = host;
        }
        if let Some(port) = non_empty(lookup("PGPORT")) {
            config.port = port
                .parse()
                .map_err(|_| ProbeError::Config(format!("PGPORT is not a port number: {}", port)))?;
        }
        if let Some(dbname) = non_empty(lookup("PGDATABASE")) {
            config.dbname = dbname;
        }
        if let Some(user) = non_empty(lookup("PGUSER")) {
            config.user = user;
        }
        config.password = non_empty(lookup("PGPASSWORD"));
        Ok(config)
    }

    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .application_name(&self.application_name)
            .connect_timeout(self.connect_timeout);
        if let Some(password) = &self.password {
            config.password(password);
        }
        config
    }
}

/// Timing knobs for observation, blocked actions and cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Sleep between observer polls.
    pub poll_interval: Duration,
    /// How long the observer waits for the expected lock row.
    pub observe_timeout: Duration,
    /// Optional hard cap on observer polls, on top of the deadline.
    pub max_polls: Option<u32>,
    /// `lock_timeout` set on sessions expected to block; the statement-level
    /// safety net so a wait that never resolves still ends.
    pub lock_timeout: Duration,
    /// `lock_timeout` for scenarios that expect the wait itself to time out.
    pub contention_lock_timeout: Duration,
    /// How long to wait for a blocked action's task once it was released.
    pub join_timeout: Duration,
    /// How long cleanup waits for terminated backends to disappear.
    pub cleanup_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            poll_interval: Duration::from_millis(10),
            observe_timeout: Duration::from_secs(3),
            max_polls: None,
            lock_timeout: Duration::from_secs(10),
            contention_lock_timeout: Duration::from_secs(1),
            join_timeout: Duration::from_secs(15),
            cleanup_timeout: Duration::from_secs(5),
        }
    }
}

impl ProbeSettings {
    /// Defaults overridden by `LOCK_PROBE_*_MS` / `LOCK_PROBE_MAX_POLLS`.
    pub fn from_env() -> Result<Self, ProbeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProbeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = ProbeSettings::default();
        let millis = |key: &str, target: &mut Duration| -> Result<(), ProbeError> {
            if let Some(value) = non_empty(lookup(key)) {
                let ms: u64 = value.parse().map_err(|_| {
                    ProbeError::Config(format!("{} is not a number of milliseconds: {}", key, value))
                })?;
                *target = Duration::from_millis(ms);
            }
            Ok(())
        };
        millis("LOCK_PROBE_POLL_INTERVAL_MS", &mut settings.poll_interval)?;
        millis("LOCK_PROBE_OBSERVE_TIMEOUT_MS", &mut settings.observe_timeout)?;
        millis("LOCK_PROBE_LOCK_TIMEOUT_MS", &mut settings.lock_timeout)?;
        millis(
            "LOCK_PROBE_CONTENTION_LOCK_TIMEOUT_MS",
            &mut settings.contention_lock_timeout,
        )?;
        millis("LOCK_PROBE_JOIN_TIMEOUT_MS", &mut settings.join_timeout)?;
        millis("LOCK_PROBE_CLEANUP_TIMEOUT_MS", &mut settings.cleanup_timeout)?;
        if let Some(value) = non_empty(lookup("LOCK_PROBE_MAX_POLLS")) {
            let polls = value.parse().map_err(|_| {
                ProbeError::Config(format!("LOCK_PROBE_MAX_POLLS is not a number: {}", value))
            })?;
            settings.max_polls = Some(polls);
        }
        Ok(settings)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
