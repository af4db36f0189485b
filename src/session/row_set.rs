use tokio_postgres::SimpleQueryMessage;

/// Rows returned by a simple-protocol statement, every value as text.
///
/// Multi-statement strings accumulate rows from every statement; `affected`
/// is the row count reported by the last command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    affected: u64,
}

impl RowSet {
    pub fn from_messages(messages: Vec<SimpleQueryMessage>) -> Self {
        let mut set = RowSet::default();
        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if set.columns.is_empty() {
                        set.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    let values = (0..row.len()).map(|i| row.get(i).map(str::to_string)).collect();
                    set.rows.push(values);
                }
                SimpleQueryMessage::CommandComplete(count) => set.affected = count,
                _ => {}
            }
        }
        set
    }

    #[cfg(test)]
    pub(crate) fn with_columns(columns: &[&str]) -> Self {
        RowSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..RowSet::default()
        }
    }

    #[cfg(test)]
    pub(crate) fn push_row(&mut self, values: Vec<Option<String>>) {
        self.rows.push(values);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn affected(&self) -> u64 {
        self.affected
    }

    /// Value of `column` in row `row`; `None` for SQL null or a missing cell.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }
}
