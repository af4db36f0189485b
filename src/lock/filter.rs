use std::fmt::Write as _;

use tokio_postgres::types::ToSql;

use super::{LockMode, LockObservation};

const LOCKS_QUERY: &str = "select l.pid, l.locktype, l.relation::regclass::text as relation, \
l.virtualxid, l.mode, l.granted \
from pg_catalog.pg_locks l \
where l.pid is distinct from pg_catalog.pg_backend_pid()";

/// Predicate over `pg_locks` rows.
///
/// Every criterion is optional; an empty filter matches every lock not held
/// by the polling session. The same filter renders to SQL for a live session
/// and matches in memory, so both paths agree on what counts as a hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockFilter {
    backend_id: Option<i32>,
    excluded_backend: Option<i32>,
    mode: Option<LockMode>,
    granted: Option<bool>,
    virtual_xid: Option<String>,
    relation: Option<String>,
    locktype: Option<String>,
}

impl LockFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only locks held or awaited by this backend.
    pub fn backend(mut self, backend_id: i32) -> Self {
        self.backend_id = Some(backend_id);
        self
    }

    /// Never match locks of this backend.
    pub fn excluding(mut self, backend_id: i32) -> Self {
        self.excluded_backend = Some(backend_id);
        self
    }

    pub fn mode(mut self, mode: LockMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn granted(mut self, granted: bool) -> Self {
        self.granted = Some(granted);
        self
    }

    /// Shorthand for `granted(false)`: the request is queued behind a conflict.
    pub fn waiting(self) -> Self {
        self.granted(false)
    }

    /// Only `virtualxid` locks on this transaction.
    pub fn virtual_xid(mut self, vxid: impl Into<String>) -> Self {
        self.virtual_xid = Some(vxid.into());
        self
    }

    /// Only locks on this relation. In memory the name is compared against
    /// `relation::regclass::text`, so pass it schema-qualified.
    pub fn relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn locktype(mut self, locktype: impl Into<String>) -> Self {
        self.locktype = Some(locktype.into());
        self
    }

    pub fn backend_id(&self) -> Option<i32> {
        self.backend_id
    }

    pub fn excluded_backend(&self) -> Option<i32> {
        self.excluded_backend
    }

    pub fn matches(&self, lock: &LockObservation) -> bool {
        if let Some(pid) = self.backend_id {
            if lock.pid != Some(pid) {
                return false;
            }
        }
        if let Some(pid) = self.excluded_backend {
            if lock.pid == Some(pid) {
                return false;
            }
        }
        if let Some(mode) = self.mode {
            if lock.mode != mode {
                return false;
            }
        }
        if let Some(granted) = self.granted {
            if lock.granted != granted {
                return false;
            }
        }
        if let Some(vxid) = &self.virtual_xid {
            if lock.virtualxid.as_deref() != Some(vxid.as_str()) {
                return false;
            }
        }
        if let Some(relation) = &self.relation {
            if lock.relation.as_deref() != Some(relation.as_str()) {
                return false;
            }
        }
        if let Some(locktype) = &self.locktype {
            if lock.locktype != *locktype {
                return false;
            }
        }
        true
    }

    /// The same subject with mode, grant state and lock type dropped: what to
    /// show when the expected row never appeared.
    pub fn diagnostic_scope(&self) -> LockFilter {
        let mut scope = LockFilter {
            backend_id: self.backend_id,
            excluded_backend: self.excluded_backend,
            virtual_xid: self.virtual_xid.clone(),
            ..LockFilter::default()
        };
        if scope.backend_id.is_none() && scope.virtual_xid.is_none() {
            scope.relation = self.relation.clone();
        }
        scope
    }

    pub fn describe(&self) -> String {
        let mut out = match self.mode {
            Some(mode) => mode.as_str().to_string(),
            None => "any lock".to_string(),
        };
        match self.granted {
            Some(false) => out.push_str(" request (granted=false)"),
            Some(true) => out.push_str(" (granted=true)"),
            None => {}
        }
        if let Some(locktype) = &self.locktype {
            let _ = write!(out, " of type {}", locktype);
        }
        if let Some(pid) = self.backend_id {
            let _ = write!(out, " by backend {}", pid);
        }
        if let Some(relation) = &self.relation {
            let _ = write!(out, " on relation {}", relation);
        }
        if let Some(vxid) = &self.virtual_xid {
            let _ = write!(out, " on virtualxid {}", vxid);
        }
        if let Some(pid) = self.excluded_backend {
            let _ = write!(out, " excluding backend {}", pid);
        }
        out
    }

    pub fn to_query(&self) -> FilterQuery {
        let mut query = FilterQuery {
            sql: LOCKS_QUERY.to_string(),
            params: Vec::new(),
        };
        if let Some(pid) = self.backend_id {
            query.push("l.pid = ", Param::Int(pid), "");
        }
        if let Some(pid) = self.excluded_backend {
            query.push("l.pid is distinct from ", Param::Int(pid), "");
        }
        if let Some(mode) = self.mode {
            query.push("l.mode = ", Param::Text(mode.as_str().to_string()), "");
        }
        if let Some(granted) = self.granted {
            query.push("l.granted = ", Param::Bool(granted), "");
        }
        if let Some(vxid) = &self.virtual_xid {
            query.push("l.virtualxid = ", Param::Text(vxid.clone()), "");
        }
        if let Some(relation) = &self.relation {
            query.push(
                "l.relation = pg_catalog.to_regclass(",
                Param::Text(relation.clone()),
                ")::oid",
            );
        }
        if let Some(locktype) = &self.locktype {
            query.push("l.locktype = ", Param::Text(locktype.clone()), "");
        }
        query.sql.push_str(" order by l.pid, l.granted");
        query
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Param {
    Int(i32),
    Text(String),
    Bool(bool),
}

/// Parameterised `pg_locks` query rendered from a `LockFilter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterQuery {
    sql: String,
    params: Vec<Param>,
}

impl FilterQuery {
    fn push(&mut self, prefix: &str, param: Param, suffix: &str) {
        self.params.push(param);
        let _ = write!(self.sql, " and {}${}{}", prefix, self.params.len(), suffix);
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|param| match param {
                Param::Int(v) => v as &(dyn ToSql + Sync),
                Param::Text(v) => v as &(dyn ToSql + Sync),
                Param::Bool(v) => v as &(dyn ToSql + Sync),
            })
            .collect()
    }
}
