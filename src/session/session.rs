use std::fmt;
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info};

use super::checkpoint::{ControlCheckpoint, CONTROL_CHECKPOINT_QUERY};
use super::RowSet;
use crate::config::ConnectionConfig;
use crate::error::ProbeError;
use crate::fixture::Fixture;

const BACKEND_PID_QUERY: &str = "select pg_catalog.pg_backend_pid()";
const VIRTUAL_XID_QUERY: &str = "select virtualxid from pg_catalog.pg_locks \
where pid = pg_catalog.pg_backend_pid() and locktype = 'virtualxid'";
const TERMINATE_QUERY: &str = "select pg_catalog.pg_terminate_backend($1)";
const SERVER_VERSION_QUERY: &str =
    "select pg_catalog.current_setting('server_version_num')::int";

/// Transaction isolation for `Session::begin_with`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "read committed",
            IsolationLevel::RepeatableRead => "repeatable read",
            IsolationLevel::Serializable => "serializable",
        }
    }
}

/// Identifier of an in-progress transaction, e.g. `3/117`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualXid(String);

impl VirtualXid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VirtualXid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<VirtualXid> for String {
    fn from(vxid: VirtualXid) -> Self {
        vxid.0
    }
}

impl From<&VirtualXid> for String {
    fn from(vxid: &VirtualXid) -> Self {
        vxid.0.clone()
    }
}

/// One exclusive connection to the database under test.
///
/// The connection future runs on its own task. When another session
/// terminates this backend, that task ends and every later statement fails
/// with `ProbeError::ExpectedBlock(BlockOutcome::Terminated)`.
pub struct Session {
    client: Client,
    connection: JoinHandle<()>,
    backend_id: OnceCell<i32>,
}

impl Session {
    pub async fn open(config: &ConnectionConfig) -> Result<Session, ProbeError> {
        let (client, connection) = config
            .to_pg_config()
            .connect(NoTls)
            .await
            .map_err(ProbeError::Connection)?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "session connection ended");
            }
        });
        debug!(host = %config.host, port = config.port, dbname = %config.dbname, "session opened");
        Ok(Session {
            client,
            connection,
            backend_id: OnceCell::new(),
        })
    }

    /// Run arbitrary SQL over the simple protocol. Several `;`-separated
    /// statements are allowed.
    pub async fn execute(&self, statement: &str) -> Result<RowSet, ProbeError> {
        let messages = self
            .client
            .simple_query(statement)
            .await
            .map_err(|e| ProbeError::from_query(statement, e))?;
        Ok(RowSet::from_messages(messages))
    }

    pub(crate) async fn query_typed(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, ProbeError> {
        self.client
            .query(statement, params)
            .await
            .map_err(|e| ProbeError::from_query(statement, e))
    }

    async fn query_one(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, ProbeError> {
        self.client
            .query_one(statement, params)
            .await
            .map_err(|e| ProbeError::from_query(statement, e))
    }

    /// Server-assigned process id of this session. Fetched once, then cached.
    pub async fn backend_id(&self) -> Result<i32, ProbeError> {
        self.backend_id
            .get_or_try_init(|| self.fetch_backend_id())
            .await
            .copied()
    }

    /// Uncached round trip for `pg_backend_pid()`.
    pub async fn fetch_backend_id(&self) -> Result<i32, ProbeError> {
        let row = self.query_one(BACKEND_PID_QUERY, &[]).await?;
        Ok(row.get(0))
    }

    /// Virtual xid of the current transaction.
    ///
    /// Call it after the statement that matters has run inside an open
    /// transaction. Outside a transaction block it names the implicit
    /// transaction of this very query, which is gone by the time it returns.
    pub async fn virtual_xid(&self) -> Result<VirtualXid, ProbeError> {
        let row = self
            .client
            .query_opt(VIRTUAL_XID_QUERY, &[])
            .await
            .map_err(|e| ProbeError::from_query(VIRTUAL_XID_QUERY, e))?
            .ok_or(ProbeError::NoVirtualXid)?;
        let vxid: Option<String> = row.get(0);
        vxid.map(VirtualXid).ok_or(ProbeError::NoVirtualXid)
    }

    pub async fn begin(&self) -> Result<(), ProbeError> {
        self.execute("begin").await.map(|_| ())
    }

    pub async fn begin_with(&self, isolation: IsolationLevel) -> Result<(), ProbeError> {
        self.execute(&format!("begin isolation level {}", isolation.as_sql()))
            .await
            .map(|_| ())
    }

    pub async fn commit(&self) -> Result<(), ProbeError> {
        self.execute("commit").await.map(|_| ())
    }

    pub async fn rollback(&self) -> Result<(), ProbeError> {
        self.execute("rollback").await.map(|_| ())
    }

    /// Bound how long any statement on this session waits for a lock.
    pub async fn set_lock_timeout(&self, timeout: Duration) -> Result<(), ProbeError> {
        let millis = timeout.as_millis().max(1);
        self.execute(&format!("set lock_timeout = '{}ms'", millis))
            .await?;
        debug!(lock_timeout_ms = millis as u64, "lock timeout set");
        Ok(())
    }

    /// Resolve unqualified names inside the fixture's schema.
    pub async fn use_schema(&self, fixture: &Fixture) -> Result<(), ProbeError> {
        self.execute(&fixture.search_path_statement()).await.map(|_| ())
    }

    /// Ask the server to terminate `backend_id`. Returns whether a signal was sent.
    pub async fn terminate(&self, backend_id: i32) -> Result<bool, ProbeError> {
        let row = self.query_one(TERMINATE_QUERY, &[&backend_id]).await?;
        let signalled: bool = row.get(0);
        info!(backend_id, signalled, "terminate backend");
        Ok(signalled)
    }

    /// `server_version_num`, e.g. `160002`. Lock levels of several DDL forms
    /// differ between server versions.
    pub async fn server_version_num(&self) -> Result<i32, ProbeError> {
        let row = self.query_one(SERVER_VERSION_QUERY, &[]).await?;
        Ok(row.get(0))
    }

    /// Multixact and xid counters from the last checkpoint.
    pub async fn control_checkpoint(&self) -> Result<ControlCheckpoint, ProbeError> {
        let row = self.query_one(CONTROL_CHECKPOINT_QUERY, &[]).await?;
        let next_xid: String = row.get(0);
        let next_multixact_id: String = row.get(1);
        let next_multi_offset: String = row.get(2);
        ControlCheckpoint::parse(&next_xid, &next_multixact_id, &next_multi_offset)
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Close the connection and wait for its task to wind down.
    pub async fn close(self) {
        let Session {
            client, connection, ..
        } = self;
        drop(client);
        if let Err(e) = connection.await {
            debug!(error = %e, "session connection task did not finish cleanly");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("backend_id", &self.backend_id.get())
            .field("closed", &self.client.is_closed())
            .finish()
    }
}
