//! Lock scenarios against a live database.
//!
//! Point `PGHOST` (and optionally `PGPORT`, `PGUSER`, `PGPASSWORD`,
//! `PGDATABASE`) at a disposable PostgreSQL instance; without `PGHOST` every
//! test returns early. Cleanup terminates every other client backend on the
//! target database, so never aim this at a shared one.

mod support;
mod session;
mod alter_table;
mod concurrent_index;
mod unique_insert;
mod cleanup;
