use chrono::NaiveDateTime;

use crate::destination::executor::Statement;
use crate::schema::dialect::{column_specs, escape_string, text_field};
use crate::schema::{ColumnDef, ColumnType, Dialect, LiveTable, PrimaryKeyPlan};
use crate::types::{Record, Value, format_timestamp};

/// Snowflake timestamp format matching the canonical `%Y-%m-%d %H:%M:%S`.
const TIMESTAMP_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS";

/// SQL dialect of the columnar warehouse.
///
/// The warehouse folds unquoted identifiers to upper case, so every identifier is upper-cased
/// before it is quoted. Quoted upper-case names resolve the same way as unquoted ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnowflakeDialect;

impl Dialect for SnowflakeDialect {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn normalize_identifier(&self, identifier: &str) -> String {
        identifier.to_uppercase()
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.to_uppercase().replace('"', "\"\""))
    }

    fn column_type(&self, typ: ColumnType) -> &'static str {
        match typ {
            ColumnType::Integer => "INTEGER",
            ColumnType::Decimal => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text => "STRING",
            ColumnType::BoundedText => "VARCHAR(255)",
            ColumnType::AutoIncrement => "INTEGER AUTOINCREMENT",
        }
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => String::from(if *b { "TRUE" } else { "FALSE" }),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => f.to_string(),
            Value::Float(_) => "NULL".to_string(),
            Value::Text(s) => format!("'{}'", escape_string(s)),
        }
    }

    fn create_table(&self, table: &str, columns: &[ColumnDef], key: &PrimaryKeyPlan) -> Statement {
        let mut specs = column_specs(self, columns);
        let key_column = self.normalize_identifier(&key.column);
        specs.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            self.quote_identifier(&format!("{key_column}_primary_key")),
            self.quote_identifier(&key_column)
        ));

        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote_identifier(table),
            specs.join(", ")
        ))
    }

    fn add_columns(&self, table: &str, columns: &[ColumnDef]) -> Statement {
        let additions = column_specs(self, columns)
            .into_iter()
            .map(|spec| format!("{spec} NULL"))
            .collect::<Vec<_>>()
            .join(", ");

        Statement::new(format!(
            "ALTER TABLE {} ADD COLUMN {additions}",
            self.quote_identifier(table)
        ))
    }

    fn table_exists(&self, table: &str) -> Statement {
        Statement::new(format!(
            "SHOW TABLES LIKE '{}'",
            escape_string(&self.normalize_identifier(table))
        ))
    }

    fn describe_table(&self, table: &str) -> Statement {
        Statement::new(format!("DESCRIBE TABLE {}", self.quote_identifier(table)))
    }

    fn parse_description(&self, table: &str, rows: &[Record]) -> LiveTable {
        let mut live = LiveTable {
            name: self.normalize_identifier(table),
            ..LiveTable::default()
        };

        for row in rows {
            let Some(name) = text_field(row, "name") else {
                continue;
            };
            let name = self.normalize_identifier(name);

            if text_field(row, "primary key") == Some("Y") {
                live.primary_key = Some(name.clone());
                live.auto_increment = text_field(row, "default").is_some_and(|default| {
                    let default = default.to_ascii_uppercase();
                    default.contains("IDENTITY") || default.contains("AUTOINCREMENT")
                });
            }

            live.columns.push(name);
        }

        live
    }

    fn rename_table(&self, from: &str, to: &str) -> Statement {
        Statement::new(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    fn create_checkpoint_table(&self, table: &str) -> Statement {
        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} (\"TABLE_NAME\" VARCHAR(255) NOT NULL PRIMARY KEY, \"LAST_SYNCED_TIMESTAMP\" TIMESTAMP_NTZ NULL)",
            self.quote_identifier(table)
        ))
    }

    fn select_checkpoint(&self, table: &str, key: &str) -> Statement {
        Statement::new(format!(
            "SELECT TO_VARCHAR(\"LAST_SYNCED_TIMESTAMP\", '{TIMESTAMP_FORMAT}') AS \"LAST_SYNCED_TIMESTAMP\" FROM {} WHERE \"TABLE_NAME\" = ?",
            self.quote_identifier(table)
        ))
        .bind(key)
    }

    fn upsert_checkpoint(&self, table: &str, key: &str, timestamp: &NaiveDateTime) -> Statement {
        Statement::new(format!(
            "MERGE INTO {} t USING (SELECT ? AS \"TABLE_NAME\", TO_TIMESTAMP_NTZ(?, '{TIMESTAMP_FORMAT}') AS \"LAST_SYNCED_TIMESTAMP\") s \
             ON t.\"TABLE_NAME\" = s.\"TABLE_NAME\" \
             WHEN MATCHED THEN UPDATE SET t.\"LAST_SYNCED_TIMESTAMP\" = s.\"LAST_SYNCED_TIMESTAMP\" \
             WHEN NOT MATCHED THEN INSERT (\"TABLE_NAME\", \"LAST_SYNCED_TIMESTAMP\") VALUES (s.\"TABLE_NAME\", s.\"LAST_SYNCED_TIMESTAMP\")",
            self.quote_identifier(table)
        ))
        .bind(key)
        .bind(format_timestamp(timestamp))
    }
}
