use chrono::NaiveDateTime;

use crate::destination::executor::Statement;
use crate::schema::dialect::{column_specs, escape_string, text_field};
use crate::schema::{ColumnDef, ColumnType, Dialect, LiveTable, PrimaryKeyPlan};
use crate::types::{Record, Value, format_timestamp};

/// SQL dialect of the relational row store.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn column_type(&self, typ: ColumnType) -> &'static str {
        match typ {
            ColumnType::Integer => "INT",
            ColumnType::Decimal => "DECIMAL(10,4)",
            ColumnType::Boolean => "TINYINT(1)",
            ColumnType::Text => "TEXT",
            ColumnType::BoundedText => "VARCHAR(255)",
            ColumnType::AutoIncrement => "INT AUTO_INCREMENT",
        }
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => f.to_string(),
            Value::Float(_) => "NULL".to_string(),
            Value::Text(s) => format!("'{}'", escape_string(s)),
        }
    }

    fn create_table(&self, table: &str, columns: &[ColumnDef], key: &PrimaryKeyPlan) -> Statement {
        let mut specs = column_specs(self, columns);
        specs.push(format!("PRIMARY KEY ({})", self.quote_identifier(&key.column)));

        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote_identifier(table),
            specs.join(", ")
        ))
    }

    fn add_columns(&self, table: &str, columns: &[ColumnDef]) -> Statement {
        let additions = column_specs(self, columns)
            .into_iter()
            .map(|spec| format!("ADD COLUMN {spec} NULL"))
            .collect::<Vec<_>>()
            .join(", ");

        Statement::new(format!(
            "ALTER TABLE {} {additions}",
            self.quote_identifier(table)
        ))
    }

    fn table_exists(&self, table: &str) -> Statement {
        Statement::new(format!("SHOW TABLES LIKE '{}'", escape_string(table)))
    }

    fn describe_table(&self, table: &str) -> Statement {
        Statement::new(format!("SHOW COLUMNS FROM {}", self.quote_identifier(table)))
    }

    fn parse_description(&self, table: &str, rows: &[Record]) -> LiveTable {
        let mut live = LiveTable {
            name: table.to_string(),
            ..LiveTable::default()
        };

        for row in rows {
            let Some(field) = text_field(row, "Field") else {
                continue;
            };
            live.columns.push(field.to_string());

            if text_field(row, "Key") == Some("PRI") {
                live.primary_key = Some(field.to_string());
                live.auto_increment = text_field(row, "Extra")
                    .is_some_and(|extra| extra.to_ascii_lowercase().contains("auto_increment"));
            }
        }

        live
    }

    fn rename_table(&self, from: &str, to: &str) -> Statement {
        Statement::new(format!(
            "RENAME TABLE {} TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    fn create_checkpoint_table(&self, table: &str) -> Statement {
        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} (`table_name` VARCHAR(255) NOT NULL PRIMARY KEY, `last_synced_timestamp` TIMESTAMP NULL)",
            self.quote_identifier(table)
        ))
    }

    fn select_checkpoint(&self, table: &str, key: &str) -> Statement {
        Statement::new(format!(
            "SELECT DATE_FORMAT(`last_synced_timestamp`, '%Y-%m-%d %H:%i:%s') AS `last_synced_timestamp` FROM {} WHERE `table_name` = ?",
            self.quote_identifier(table)
        ))
        .bind(key)
    }

    fn upsert_checkpoint(&self, table: &str, key: &str, timestamp: &NaiveDateTime) -> Statement {
        Statement::new(format!(
            "INSERT INTO {} (`table_name`, `last_synced_timestamp`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `last_synced_timestamp` = VALUES(`last_synced_timestamp`)",
            self.quote_identifier(table)
        ))
        .bind(key)
        .bind(format_timestamp(timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    #[test]
    fn test_create_table_with_natural_key() {
        let columns = vec![
            ColumnDef::new("id", ColumnType::BoundedText),
            ColumnDef::new("amount", ColumnType::Decimal),
        ];
        let key = PrimaryKeyPlan {
            column: "id".into(),
            synthesized: false,
        };

        let statement = MySqlDialect.create_table("invoices", &columns, &key);

        assert_eq!(
            statement.sql,
            "CREATE TABLE IF NOT EXISTS `invoices` (`id` VARCHAR(255), `amount` DECIMAL(10,4), PRIMARY KEY (`id`))"
        );
    }

    #[test]
    fn test_create_table_with_synthesized_key() {
        let columns = vec![
            ColumnDef::new("id", ColumnType::AutoIncrement),
            ColumnDef::new("data_table", ColumnType::Text),
        ];
        let key = PrimaryKeyPlan {
            column: "id".into(),
            synthesized: true,
        };

        let statement = MySqlDialect.create_table("etl_log", &columns, &key);

        assert_eq!(
            statement.sql,
            "CREATE TABLE IF NOT EXISTS `etl_log` (`id` INT AUTO_INCREMENT, `data_table` TEXT, PRIMARY KEY (`id`))"
        );
    }

    #[test]
    fn test_add_columns() {
        let statement = MySqlDialect.add_columns(
            "invoices",
            &[
                ColumnDef::new("late_fee", ColumnType::Decimal),
                ColumnDef::new("memo", ColumnType::Text),
            ],
        );

        assert_eq!(
            statement.sql,
            "ALTER TABLE `invoices` ADD COLUMN `late_fee` DECIMAL(10,4) NULL, ADD COLUMN `memo` TEXT NULL"
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(MySqlDialect.literal(&Value::Null), "NULL");
        assert_eq!(MySqlDialect.literal(&Value::Bool(true)), "1");
        assert_eq!(MySqlDialect.literal(&Value::Int(-3)), "-3");
        assert_eq!(MySqlDialect.literal(&Value::Float(f64::NAN)), "NULL");
        assert_eq!(MySqlDialect.literal(&Value::from("it's")), "'it\\'s'");
    }

    #[test]
    fn test_parse_description() {
        let rows = vec![
            record! { "Field" => "id", "Type" => "int", "Key" => "PRI", "Extra" => "auto_increment" },
            record! { "Field" => "name", "Type" => "text", "Key" => "", "Extra" => "" },
        ];

        let live = MySqlDialect.parse_description("users", &rows);

        assert_eq!(live.columns, vec!["id", "name"]);
        assert_eq!(live.primary_key.as_deref(), Some("id"));
        assert!(live.auto_increment);
    }

    #[test]
    fn test_quote_identifier_escapes_backticks() {
        assert_eq!(MySqlDialect.quote_identifier("a`b"), "`a``b`");
    }
}
