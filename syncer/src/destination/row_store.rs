use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::bail;
use crate::destination::executor::{AffectedRowsConvention, SqlExecutor, Statement};
use crate::destination::{LoadCounts, Loader, Tabulated, count_duplicate_keys};
use crate::error::{ErrorKind, SyncResult};
use crate::schema::{Dialect, MySqlDialect, SchemaAdapter};
use crate::types::{DestinationKind, LoadTarget, Record, Value};

/// What a single upsert did to the destination row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Classifies the affected-row count of one insert-or-update statement.
///
/// `existed` is only consulted when the count alone is ambiguous.
fn classify(convention: AffectedRowsConvention, affected: u64, existed: bool) -> UpsertOutcome {
    match (convention, affected) {
        (_, 0) => UpsertOutcome::Unchanged,
        (AffectedRowsConvention::ChangedRows, 1) => UpsertOutcome::Inserted,
        (AffectedRowsConvention::FoundRows, 1) if existed => UpsertOutcome::Unchanged,
        (AffectedRowsConvention::FoundRows, 1) => UpsertOutcome::Inserted,
        _ => UpsertOutcome::Updated,
    }
}

/// Loader for the relational row store.
///
/// Every record becomes one `INSERT ... ON DUPLICATE KEY UPDATE` with escaped literal values.
/// The affected-row count of each statement tells inserted, updated and unchanged rows apart.
#[derive(Debug)]
pub struct RowStoreLoader {
    executor: Arc<dyn SqlExecutor>,
    dialect: Arc<dyn Dialect>,
    schema: SchemaAdapter,
}

impl RowStoreLoader {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        let dialect: Arc<dyn Dialect> = Arc::new(MySqlDialect);
        let schema = SchemaAdapter::new(Arc::clone(&dialect), Arc::clone(&executor));

        Self {
            executor,
            dialect,
            schema,
        }
    }

    fn upsert_statement(&self, table: &str, columns: &[String], key: &str, row: &[Value]) -> Statement {
        let quoted: Vec<String> = columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect();
        let values: Vec<String> = row.iter().map(|v| self.dialect.literal(v)).collect();

        let mut updates: Vec<String> = columns
            .iter()
            .zip(&quoted)
            .filter(|(column, _)| !column.eq_ignore_ascii_case(key))
            .map(|(_, quoted)| format!("{quoted} = VALUES({quoted})"))
            .collect();
        if updates.is_empty() {
            updates = quoted.iter().map(|q| format!("{q} = VALUES({q})")).collect();
        }

        Statement::new(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            self.dialect.quote_identifier(table),
            quoted.join(", "),
            values.join(", "),
            updates.join(", ")
        ))
    }

    fn exists_statement(&self, table: &str, key: &str, value: &Value) -> Statement {
        Statement::new(format!(
            "SELECT COUNT(*) AS matches FROM {} WHERE {} = {}",
            self.dialect.quote_identifier(table),
            self.dialect.quote_identifier(key),
            self.dialect.literal(value)
        ))
    }

    async fn key_exists(&self, table: &str, key: &str, value: &Value) -> SyncResult<bool> {
        let rows = self
            .executor
            .query(&self.exists_statement(table, key, value))
            .await?;

        let matches = rows
            .first()
            .and_then(|row| row.iter().next().map(|(_, v)| v.clone()))
            .map(|v| match v {
                Value::Int(n) => n,
                Value::Text(s) => s.trim().parse().unwrap_or(0),
                _ => 0,
            })
            .unwrap_or(0);

        Ok(matches > 0)
    }

    async fn upsert_row(
        &self,
        table: &str,
        columns: &[String],
        key: Option<(&str, usize)>,
        row: &[Value],
    ) -> SyncResult<UpsertOutcome> {
        let convention = self.executor.affected_rows_convention();
        let existed = match (convention, key) {
            (AffectedRowsConvention::FoundRows, Some((key, index))) => {
                self.key_exists(table, key, &row[index]).await?
            }
            _ => false,
        };

        let statement = self.upsert_statement(table, columns, key.map_or("", |(k, _)| k), row);
        trace!(table, sql = %statement.sql, "executing upsert");
        let affected = self.executor.execute(&statement).await.inspect_err(|err| {
            warn!(
                table,
                sql = %statement.sql,
                error = %err,
                "failed to upsert row"
            );
        })?;

        Ok(classify(convention, affected, existed))
    }
}

/// Checks that every record carries exactly the fields of the first one.
fn validate_field_sets(table: &str, batch: &[Record]) -> SyncResult<()> {
    let Some(first) = batch.first() else {
        return Ok(());
    };
    let expected: BTreeSet<&str> = first.keys().collect();

    for (position, record) in batch.iter().enumerate().skip(1) {
        let actual: BTreeSet<&str> = record.keys().collect();
        if actual == expected {
            continue;
        }

        let missing: Vec<&str> = expected.difference(&actual).copied().collect();
        let unexpected: Vec<&str> = actual.difference(&expected).copied().collect();
        bail!(
            ErrorKind::SchemaMismatch,
            "Record fields do not match the batch columns",
            format!(
                "table `{table}`, record {position}: expected {} fields, found {}; missing {missing:?}, unexpected {unexpected:?}",
                expected.len(),
                actual.len()
            )
        );
    }

    Ok(())
}

#[async_trait]
impl Loader for RowStoreLoader {
    fn kind(&self) -> DestinationKind {
        DestinationKind::RowStore
    }

    async fn load_batch(&mut self, target: &LoadTarget, batch: &[Record]) -> SyncResult<LoadCounts> {
        let mut counts = LoadCounts {
            input: batch.len() as u64,
            ..LoadCounts::default()
        };
        if batch.is_empty() {
            return Ok(counts);
        }

        validate_field_sets(&target.table, batch)?;
        let live = self
            .schema
            .ensure_schema(&target.table, target.primary_key.as_deref(), batch)
            .await?;

        let table = Tabulated::new(batch, |name| self.dialect.normalize_identifier(name));
        let key = live
            .primary_key
            .as_deref()
            .and_then(|key| table.column_index(key).map(|index| (key, index)));
        if let Some((key, _)) = key {
            counts.duplicates = count_duplicate_keys(batch, key);
        }

        for row in &table.rows {
            match self.upsert_row(&live.name, &table.columns, key, row).await {
                Ok(UpsertOutcome::Inserted) => counts.inserted += 1,
                Ok(UpsertOutcome::Updated) => counts.updated += 1,
                Ok(UpsertOutcome::Unchanged) => counts.unchanged += 1,
                Err(_) => counts.failed += 1,
            }
        }
        counts.affected = counts.inserted + counts.updated;

        debug!(
            table = %live.name,
            inserted = counts.inserted,
            updated = counts.updated,
            unchanged = counts.unchanged,
            failed = counts.failed,
            "loaded batch into row store"
        );

        Ok(counts)
    }

    async fn append_rows(&mut self, target: &LoadTarget, rows: &[Record]) -> SyncResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let live = self
            .schema
            .ensure_schema(&target.table, target.primary_key.as_deref(), rows)
            .await?;
        let table = Tabulated::new(rows, |name| self.dialect.normalize_identifier(name));

        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect();
        let values: Vec<String> = table
            .rows
            .iter()
            .map(|row| {
                let literals: Vec<String> = row.iter().map(|v| self.dialect.literal(v)).collect();
                format!("({})", literals.join(", "))
            })
            .collect();

        let statement = Statement::new(format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.dialect.quote_identifier(&live.name),
            columns.join(", "),
            values.join(", ")
        ));
        trace!(table = %live.name, sql = %statement.sql, "appending rows");

        self.executor.execute(&statement).await
    }

    async fn shutdown(&mut self) -> SyncResult<()> {
        self.executor.close().await
    }
}
