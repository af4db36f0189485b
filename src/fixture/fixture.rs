use crate::error::ProbeError;

const SCHEMA_PREFIX: &str = "lock_probe_";

/// Per-scenario schema and the tables a scenario needs inside it.
///
/// Setup always drops the schema first, so it starts clean no matter what
/// an earlier run left behind. Table columns and extra statements are
/// written unqualified; they run with `search_path` set to the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    schema: String,
    tables: Vec<(String, String)>,
    statements: Vec<String>,
}

impl Fixture {
    /// A fixture in schema `lock_probe_<name>`.
    pub fn new(name: &str) -> Result<Self, ProbeError> {
        let schema = format!("{}{}", SCHEMA_PREFIX, name);
        validate_identifier(&schema)?;
        Ok(Fixture {
            schema,
            tables: Vec::new(),
            statements: Vec::new(),
        })
    }

    /// Add `create table <name> (<columns>)`.
    pub fn table(mut self, name: &str, columns: &str) -> Self {
        self.tables.push((name.to_string(), columns.to_string()));
        self
    }

    /// Add a statement that runs after every table exists.
    pub fn statement(mut self, sql: &str) -> Self {
        self.statements.push(sql.to_string());
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|(name, _)| name.as_str())
    }

    /// `schema.table`, the form `relation::regclass::text` takes outside the
    /// schema's own search path.
    pub fn qualify(&self, table: &str) -> String {
        format!("{}.{}", self.schema, table)
    }

    pub fn search_path_statement(&self) -> String {
        format!("set search_path to {}", self.schema)
    }

    /// The whole setup as one multi-statement string.
    pub fn setup_sql(&self) -> Result<String, ProbeError> {
        let mut sql = vec![
            format!("drop schema if exists {} cascade", self.schema),
            format!("create schema {}", self.schema),
            self.search_path_statement(),
        ];
        for (name, columns) in &self.tables {
            validate_identifier(name)?;
            sql.push(format!("create table {} ({})", name, columns));
        }
        sql.extend(self.statements.iter().cloned());
        Ok(sql.join(";\n") + ";")
    }

    pub fn teardown_sql(&self) -> String {
        format!("drop schema if exists {} cascade", self.schema)
    }
}

/// Plain lower-case identifiers only, so names can be spliced into DDL
/// without quoting.
pub(crate) fn validate_identifier(name: &str) -> Result<(), ProbeError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(ProbeError::InvalidIdentifier(name.to_string()))
    }
}
