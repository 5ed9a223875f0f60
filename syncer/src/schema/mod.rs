//! Destination schema inference and online migration.
//!
//! Both destinations share the algorithm in [`SchemaAdapter`]; they differ only in the SQL
//! produced by their [`Dialect`].

mod adapter;
pub(crate) mod dialect;
mod mysql;
mod snowflake;

pub use adapter::SchemaAdapter;
pub use dialect::Dialect;
pub use mysql::MySqlDialect;
pub use snowflake::SnowflakeDialect;

use crate::types::{Record, Value};

/// Name given to a synthesized key when a table declares none.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Logical column types inferred from record values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Decimal,
    Boolean,
    /// Unbounded text. Source text has no length limit.
    Text,
    /// Indexable text, used only for primary keys.
    BoundedText,
    /// Synthesized auto-incrementing integer key.
    AutoIncrement,
}

impl ColumnType {
    /// Infers the type of a single value. Nulls carry no type information.
    pub fn infer(value: &Value) -> Option<ColumnType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Int(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Decimal),
            Value::Text(_) => Some(ColumnType::Text),
        }
    }
}

/// A column to create or add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub typ: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, typ: ColumnType) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// How the primary key of a new table is provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyPlan {
    pub column: String,
    /// `true` when the key is absent from the data and generated by the destination.
    pub synthesized: bool,
}

/// Columns and key of a table as it exists in the destination.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<String>,
    pub primary_key: Option<String>,
    /// `true` when the primary key is generated by the destination.
    pub auto_increment: bool,
}

impl LiveTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Infers the ordered column list of a batch.
///
/// Columns follow the first record's field order; columns first seen in later records are
/// appended. A column's type comes from the first non-null value in batch order and falls back
/// to [`ColumnType::Text`] when every value is null.
pub fn infer_columns(batch: &[Record], normalize: impl Fn(&str) -> String) -> Vec<ColumnDef> {
    let mut columns: Vec<ColumnDef> = Vec::new();
    let mut typed: Vec<bool> = Vec::new();

    for record in batch {
        for (field, value) in record.iter() {
            let name = normalize(field);
            let inferred = ColumnType::infer(value);

            match columns.iter().position(|c| c.name == name) {
                Some(index) => {
                    if !typed[index] {
                        if let Some(typ) = inferred {
                            columns[index].typ = typ;
                            typed[index] = true;
                        }
                    }
                }
                None => {
                    columns.push(ColumnDef::new(name, inferred.unwrap_or(ColumnType::Text)));
                    typed.push(inferred.is_some());
                }
            }
        }
    }

    columns
}

/// Resolves the primary key for a new table, synthesizing an auto-incrementing key when the
/// declared key is absent from the data and narrowing a text key to an indexable type.
pub fn plan_primary_key(columns: &mut Vec<ColumnDef>, primary_key: &str) -> PrimaryKeyPlan {
    match columns
        .iter_mut()
        .find(|c| c.name.eq_ignore_ascii_case(primary_key))
    {
        Some(column) => {
            if column.typ == ColumnType::Text {
                column.typ = ColumnType::BoundedText;
            }
            PrimaryKeyPlan {
                column: column.name.clone(),
                synthesized: false,
            }
        }
        None => {
            columns.insert(0, ColumnDef::new(primary_key, ColumnType::AutoIncrement));
            PrimaryKeyPlan {
                column: primary_key.to_string(),
                synthesized: true,
            }
        }
    }
}
