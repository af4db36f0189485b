use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use tracing::info;

use super::{Harness, ScenarioReport};
use crate::error::ProbeError;
use crate::fixture::Fixture;
use crate::lock::{LockFilter, LockMode, LockObservation};
use crate::session::IsolationLevel;

const ADD_PLAIN_COLUMN: &str = "alter table other_flows add column value text";
const ADD_REFERENCE_COLUMN: &str =
    "alter table other_flows add column flow_id integer references flows(id)";
const CREATE_INDEX_CONCURRENTLY: &str = "create unique index concurrently index_other_flows_value \
on other_flows using btree (id, value)";
const INSERT_FOO: &str = "insert into example_with_unique (value) values ('foo')";

/// First `server_version_num` on which adding a foreign key takes only
/// ShareRowExclusiveLock on the referenced table.
pub const REFERENCE_SHARE_ROW_EXCLUSIVE_SINCE: i32 = 90500;

/// Lock an `add column ... references` statement takes on the referenced table.
pub fn referenced_table_lock(server_version_num: i32) -> LockMode {
    if server_version_num >= REFERENCE_SHARE_ROW_EXCLUSIVE_SINCE {
        LockMode::ShareRowExclusive
    } else {
        LockMode::AccessExclusive
    }
}

/// The lock behaviours this harness knows how to provoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinScenario {
    /// An AccessShare holder on `flows` does not stop a plain column being
    /// added to `other_flows`.
    AlterTableAddColumn,
    /// Adding a column that references `flows` while a reader holds
    /// AccessShare on it. Before 9.5 the AccessExclusive request on `flows`
    /// queues behind the reader; from 9.5 on the statement is granted
    /// ShareRowExclusive on `flows` and completes.
    AlterTableAddReference,
    /// `create index concurrently` on `other_flows` only needs
    /// ShareUpdateExclusive, so a read-committed reader does not hold it up.
    ConcurrentIndexWithReaders,
    /// A repeatable-read transaction whose snapshot predates the index build
    /// makes the build wait with a ShareLock on that transaction's virtual xid.
    ConcurrentIndexWaitsForSnapshot,
    /// A second insert of an uncommitted unique value waits, then gives up on
    /// its lock timeout.
    UniqueInsertContention,
}

impl BuiltinScenario {
    pub const ALL: [BuiltinScenario; 5] = [
        BuiltinScenario::AlterTableAddColumn,
        BuiltinScenario::AlterTableAddReference,
        BuiltinScenario::ConcurrentIndexWithReaders,
        BuiltinScenario::ConcurrentIndexWaitsForSnapshot,
        BuiltinScenario::UniqueInsertContention,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinScenario::AlterTableAddColumn => "alter_table_add_column",
            BuiltinScenario::AlterTableAddReference => "alter_table_add_reference",
            BuiltinScenario::ConcurrentIndexWithReaders => "concurrent_index_with_readers",
            BuiltinScenario::ConcurrentIndexWaitsForSnapshot => "concurrent_index_waits_for_snapshot",
            BuiltinScenario::UniqueInsertContention => "unique_insert_contention",
        }
    }

    pub fn fixture(&self) -> Result<Fixture, ProbeError> {
        let fixture = Fixture::new(self.name())?;
        Ok(match self {
            BuiltinScenario::AlterTableAddColumn | BuiltinScenario::AlterTableAddReference => fixture
                .table("flows", "id serial primary key")
                .table("other_flows", "id serial"),
            BuiltinScenario::ConcurrentIndexWithReaders
            | BuiltinScenario::ConcurrentIndexWaitsForSnapshot => fixture
                .table("flows", "id serial, value text not null")
                .table("other_flows", "id serial, value text not null"),
            BuiltinScenario::UniqueInsertContention => fixture
                .table("example_with_unique", "id serial primary key, value text unique")
                .statement(
                    "create unique index idx_example_with_unique_value \
                     on example_with_unique using btree (value)",
                ),
        })
    }

    /// Prepare, run, then always sweep backends and drop the schema.
    pub async fn run(&self, harness: &Harness) -> ScenarioReport {
        let started = Instant::now();
        info!(scenario = self.name(), "scenario starting");
        let result = match self.fixture() {
            Ok(fixture) => {
                let result = self.execute(harness, &fixture).await;
                let swept = harness.cleanup().await;
                let dropped = harness.teardown(&fixture).await;
                result.and_then(|observed| swept.and(dropped).map(|_| observed))
            }
            Err(e) => Err(e),
        };
        let report = ScenarioReport::new(self.name(), started.elapsed(), result);
        info!(
            scenario = self.name(),
            passed = report.passed,
            elapsed_ms = report.elapsed_ms,
            "scenario finished"
        );
        report
    }

    async fn execute(
        &self,
        harness: &Harness,
        fixture: &Fixture,
    ) -> Result<Vec<LockObservation>, ProbeError> {
        harness.prepare(fixture).await?;
        let holder = harness.session_in(fixture).await?;
        let prober = harness.session_in(fixture).await?;

        match self {
            BuiltinScenario::AlterTableAddColumn => {
                holder.begin().await?;
                holder.execute("select * from flows").await?;
                harness.expect_completes(&prober, ADD_PLAIN_COLUMN).await?;
                Ok(Vec::new())
            }
            BuiltinScenario::AlterTableAddReference => {
                let version = harness.control().server_version_num().await?;
                holder.begin().await?;
                holder.execute("select * from flows").await?;
                match referenced_table_lock(version) {
                    LockMode::AccessExclusive => {
                        let mut action =
                            harness.spawn_action(prober, [ADD_REFERENCE_COLUMN]).await?;
                        let expected = LockFilter::new()
                            .backend(action.backend_id())
                            .mode(LockMode::AccessExclusive)
                            .waiting()
                            .relation(fixture.qualify("flows"));
                        let observed = harness.expect_blocked(&mut action, &expected).await?;
                        harness.release(action).await?;
                        Ok(observed.rows)
                    }
                    mode => {
                        // Keep the transaction open so the granted lock stays visible.
                        prober.begin().await?;
                        harness.expect_completes(&prober, ADD_REFERENCE_COLUMN).await?;
                        let expected = LockFilter::new()
                            .backend(prober.backend_id().await?)
                            .mode(mode)
                            .granted(true)
                            .relation(fixture.qualify("flows"));
                        let observed = harness.observer().poll_until(&expected).await?;
                        prober.rollback().await?;
                        Ok(observed.rows)
                    }
                }
            }
            BuiltinScenario::ConcurrentIndexWithReaders => {
                holder.begin().await?;
                holder.execute("select * from flows").await?;
                harness
                    .expect_completes(&prober, CREATE_INDEX_CONCURRENTLY)
                    .await?;
                Ok(Vec::new())
            }
            BuiltinScenario::ConcurrentIndexWaitsForSnapshot => {
                // Repeatable read keeps the xmin between statements; read
                // committed would clear it once the select finished.
                holder.begin_with(IsolationLevel::RepeatableRead).await?;
                holder.execute("select * from flows").await?;
                let vxid = holder.virtual_xid().await?;
                let mut action = harness
                    .spawn_action(prober, [CREATE_INDEX_CONCURRENTLY])
                    .await?;
                let expected = LockFilter::new()
                    .backend(action.backend_id())
                    .virtual_xid(&vxid)
                    .mode(LockMode::Share)
                    .waiting();
                let observed = harness.expect_blocked(&mut action, &expected).await?;
                harness.release(action).await?;
                Ok(observed.rows)
            }
            BuiltinScenario::UniqueInsertContention => {
                holder.begin().await?;
                holder.execute(INSERT_FOO).await?;
                let action = harness
                    .spawn_contended(prober, ["begin", INSERT_FOO])
                    .await?;
                harness.expect_lock_timeout(action).await?;
                Ok(Vec::new())
            }
        }
    }
}

impl fmt::Display for BuiltinScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinScenario {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltinScenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| ProbeError::Config(format!("unknown scenario: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for scenario in BuiltinScenario::ALL {
            assert_eq!(scenario.name().parse::<BuiltinScenario>().unwrap(), scenario);
        }
        assert!("bad_statistics".parse::<BuiltinScenario>().is_err());
    }

    #[test]
    fn every_scenario_has_its_own_schema() {
        let mut schemas: Vec<String> = BuiltinScenario::ALL
            .iter()
            .map(|s| s.fixture().unwrap().schema().to_string())
            .collect();
        schemas.sort();
        schemas.dedup();
        assert_eq!(schemas.len(), BuiltinScenario::ALL.len());
    }

    #[test]
    fn fixtures_render() {
        for scenario in BuiltinScenario::ALL {
            let sql = scenario.fixture().unwrap().setup_sql().unwrap();
            assert!(sql.starts_with("drop schema if exists lock_probe_"), "{}", scenario);
        }
    }

    #[test]
    fn referenced_table_lock_depends_on_server_version() {
        assert_eq!(referenced_table_lock(90409), LockMode::AccessExclusive);
        assert_eq!(referenced_table_lock(90500), LockMode::ShareRowExclusive);
        assert_eq!(referenced_table_lock(150018), LockMode::ShareRowExclusive);
        // Neither conflicts with a reader the same way.
        assert!(LockMode::AccessExclusive.conflicts_with(LockMode::AccessShare));
        assert!(!LockMode::ShareRowExclusive.conflicts_with(LockMode::AccessShare));
    }

    #[test]
    fn reference_scenario_targets_flows() {
        let fixture = BuiltinScenario::AlterTableAddReference.fixture().unwrap();
        let tables: Vec<&str> = fixture.tables().collect();
        assert_eq!(tables, vec!["flows", "other_flows"]);
        assert!(fixture.setup_sql().unwrap().contains("create table flows (id serial primary key)"));
    }
}
