use std::fmt;

use chrono::NaiveDateTime;

use crate::destination::executor::Statement;
use crate::schema::{ColumnDef, ColumnType, LiveTable, PrimaryKeyPlan};
use crate::types::{Record, Value};

/// SQL generation for one destination family.
///
/// Table and column names passed in are already normalized with
/// [`Dialect::normalize_identifier`].
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Folds an identifier to the case the destination stores it in.
    fn normalize_identifier(&self, identifier: &str) -> String {
        identifier.to_string()
    }

    fn quote_identifier(&self, identifier: &str) -> String;

    fn column_type(&self, typ: ColumnType) -> &'static str;

    /// Renders a value as an escaped SQL literal.
    fn literal(&self, value: &Value) -> String;

    fn create_table(&self, table: &str, columns: &[ColumnDef], key: &PrimaryKeyPlan) -> Statement;

    /// Adds nullable columns to an existing table.
    fn add_columns(&self, table: &str, columns: &[ColumnDef]) -> Statement;

    /// Lists tables whose name matches `table`. Any row naming the table means it exists.
    fn table_exists(&self, table: &str) -> Statement;

    fn describe_table(&self, table: &str) -> Statement;

    /// Reads the rows returned by [`Dialect::describe_table`].
    fn parse_description(&self, table: &str, rows: &[Record]) -> LiveTable;

    fn rename_table(&self, from: &str, to: &str) -> Statement;

    fn truncate_table(&self, table: &str) -> Statement {
        Statement::new(format!("TRUNCATE TABLE {}", self.quote_identifier(table)))
    }

    fn drop_table(&self, table: &str) -> Statement {
        Statement::new(format!(
            "DROP TABLE IF EXISTS {}",
            self.quote_identifier(table)
        ))
    }

    fn create_checkpoint_table(&self, table: &str) -> Statement;

    /// Selects the checkpoint of `key`, rendered in the canonical timestamp format.
    fn select_checkpoint(&self, table: &str, key: &str) -> Statement;

    fn upsert_checkpoint(&self, table: &str, key: &str, timestamp: &NaiveDateTime) -> Statement;
}

/// Escapes a string for use inside a single-quoted literal.
pub(crate) fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\u{1a}' => escaped.push_str("\\Z"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Renders the column list of a `CREATE TABLE` or `ALTER TABLE`.
pub(crate) fn column_specs<D: Dialect + ?Sized>(dialect: &D, columns: &[ColumnDef]) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            format!(
                "{} {}",
                dialect.quote_identifier(&column.name),
                dialect.column_type(column.typ)
            )
        })
        .collect()
}

/// Returns `true` when any text value of the listing `rows` names `table`, ignoring case.
pub(crate) fn lists_table(rows: &[Record], table: &str) -> bool {
    rows.iter().any(|row| {
        row.iter()
            .any(|(_, value)| value.as_str().is_some_and(|name| name.eq_ignore_ascii_case(table)))
    })
}

/// Returns the value of `column` in `row` as text, matching the column name case-insensitively.
pub(crate) fn text_field<'a>(row: &'a Record, column: &str) -> Option<&'a str> {
    row.get_ignore_case(column).and_then(Value::as_str)
}
