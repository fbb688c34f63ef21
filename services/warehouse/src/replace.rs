//! Replace-load: clear a set of tables and bulk-insert their new contents.
//!
//! A [`ReplaceSet`] groups every table one stage writes. Warehouses apply the
//! whole set in one transactional scope: either every listed table holds
//! exactly its new rows afterwards, or none of them changed.

use crate::error::{Error, Result};
use crate::model::TableRow;
use crate::table::{ColumnKind, Table};
use crate::value::{Record, Value};

/// PostgreSQL accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone)]
pub struct TableWrite {
    pub table: Table,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplaceSet {
    writes: Vec<TableWrite>,
}

impl ReplaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the typed rows for `T::TABLE`. Adding the same table twice keeps
    /// only the last rows given.
    pub fn rows<T: TableRow>(self, rows: &[T]) -> Self {
        let records = rows.iter().map(TableRow::to_record).collect();
        self.records(T::TABLE, records)
    }

    pub fn records(mut self, table: Table, records: Vec<Record>) -> Self {
        self.writes.retain(|w| w.table != table);
        self.writes.push(TableWrite { table, records });
        self
    }

    pub fn writes(&self) -> &[TableWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<TableWrite> {
        self.writes
    }

    pub fn tables(&self) -> Vec<Table> {
        self.writes.iter().map(|w| w.table).collect()
    }

    pub fn row_count(&self) -> usize {
        self.writes.iter().map(|w| w.records.len()).sum()
    }

    /// Checks every record against its table: no unknown columns, no NULL in
    /// a required column, values of the column's kind. Absent columns are
    /// written as NULL.
    pub fn validate(&self) -> Result<()> {
        for write in &self.writes {
            for record in &write.records {
                check_record(write.table, record)?;
            }
        }
        Ok(())
    }
}

fn check_record(table: Table, record: &Record) -> Result<()> {
    let shape = |column: &str, detail: String| Error::Shape {
        table: table.name(),
        column: column.to_string(),
        detail,
    };

    if let Some(unknown) = record.columns().find(|c| table.column(c).is_none()) {
        return Err(shape(unknown, "no such column".to_string()));
    }

    for column in table.columns() {
        let value = record.get(column.name);
        let fits = match (column.kind, value) {
            (_, Value::Null) => column.nullable,
            (ColumnKind::Int, Value::Int(_)) => true,
            (ColumnKind::Float, Value::Float(_) | Value::Int(_)) => true,
            (ColumnKind::Text, Value::Text(_)) => true,
            (ColumnKind::Timestamp, Value::Timestamp(_)) => true,
            (ColumnKind::Date, Value::Date(_)) => true,
            _ => false,
        };
        if !fits {
            return Err(shape(
                column.name,
                format!("{} value for {} column", value.kind_name(), column.kind.sql_type()),
            ));
        }
    }
    Ok(())
}

/// Rows per INSERT statement: the configured batch size, capped by the bind
/// parameter limit for the table's width.
pub fn rows_per_batch(batch_size: usize, column_count: usize) -> usize {
    let cap = MAX_BIND_PARAMS / column_count.max(1);
    batch_size.clamp(1, cap)
}
