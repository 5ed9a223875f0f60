//! Loaders delivering mapped batches to the destinations.
//!
//! Both SQL loaders share schema adaptation through [`crate::schema::SchemaAdapter`] and talk to
//! their database through a [`SqlExecutor`]. They differ in how rows are reconciled with the
//! existing table: the row store upserts each row, the column store stages the batch and
//! merges it in one statement.

mod base;
pub mod column_store;
pub mod executor;
pub mod memory;
pub mod row_store;

pub use base::{LoadCounts, Loader};
pub use column_store::ColumnStoreLoader;
pub use executor::{AffectedRowsConvention, SqlExecutor, Statement};
pub use row_store::RowStoreLoader;

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use crate::types::{Record, Value};

/// A batch laid out as one column list and rows aligned to it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tabulated {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Tabulated {
    /// Lays out `batch` using normalized column names.
    ///
    /// Columns follow first appearance across the batch. Records lacking a column get
    /// [`Value::Null`] in that position.
    pub fn new(batch: &[Record], normalize: impl Fn(&str) -> String) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut normalized: Vec<Vec<(usize, &Value)>> = Vec::with_capacity(batch.len());

        for record in batch {
            let mut positions = Vec::with_capacity(record.len());
            for (field, value) in record.iter() {
                let name = normalize(field);
                let index = match columns.iter().position(|c| *c == name) {
                    Some(index) => index,
                    None => {
                        columns.push(name);
                        columns.len() - 1
                    }
                };
                positions.push((index, value));
            }
            normalized.push(positions);
        }

        let rows = normalized
            .into_iter()
            .map(|positions| {
                let mut row = vec![Value::Null; columns.len()];
                for (index, value) in positions {
                    row[index] = value.clone();
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Collapses rows sharing a key, keeping the last version of each at the position of its
    /// first occurrence. Returns how many rows were dropped.
    ///
    /// Rows with a null key are never collapsed.
    pub fn dedup_by_key(&mut self, key_index: usize) -> u64 {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<Vec<Value>> = Vec::with_capacity(self.rows.len());
        let mut duplicates = 0;

        for row in std::mem::take(&mut self.rows) {
            match row[key_index].render().map(Cow::into_owned) {
                Some(key) => match seen.get(&key) {
                    Some(&index) => {
                        kept[index] = row;
                        duplicates += 1;
                    }
                    None => {
                        seen.insert(key, kept.len());
                        kept.push(row);
                    }
                },
                None => kept.push(row),
            }
        }

        self.rows = kept;

        duplicates
    }
}

/// Counts records whose value of `key` repeats an earlier record of the batch.
pub(crate) fn count_duplicate_keys(batch: &[Record], key: &str) -> u64 {
    let mut seen = HashSet::new();
    batch
        .iter()
        .filter_map(|record| record.get_ignore_case(key).and_then(Value::render))
        .filter(|key| !seen.insert(key.to_string()))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    #[test]
    fn test_tabulate_aligns_sparse_records() {
        let batch = vec![
            record! { "id" => 1i64, "name" => "a" },
            record! { "id" => 2i64, "extra" => true },
        ];

        let table = Tabulated::new(&batch, |c| c.to_uppercase());

        assert_eq!(table.columns, vec!["ID", "NAME", "EXTRA"]);
        assert_eq!(
            table.rows[1],
            vec![Value::Int(2), Value::Null, Value::Bool(true)]
        );
    }

    #[test]
    fn test_dedup_keeps_last_version_in_first_position() {
        let batch = vec![
            record! { "id" => 1i64, "v" => "old" },
            record! { "id" => 2i64, "v" => "b" },
            record! { "id" => 1i64, "v" => "new" },
            record! { "id" => Value::Null, "v" => "x" },
            record! { "id" => Value::Null, "v" => "y" },
        ];
        let mut table = Tabulated::new(&batch, str::to_string);

        let duplicates = table.dedup_by_key(0);

        assert_eq!(duplicates, 1);
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.rows[0], vec![Value::Int(1), Value::from("new")]);
    }

    #[test]
    fn test_count_duplicate_keys() {
        let batch = vec![
            record! { "recordId" => "1" },
            record! { "recordId" => "2" },
            record! { "recordId" => "1" },
        ];

        assert_eq!(count_duplicate_keys(&batch, "recordid"), 1);
        assert_eq!(count_duplicate_keys(&batch, "missing"), 0);
    }
}
