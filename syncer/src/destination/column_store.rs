use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use syncer_config::shared::StagingTableKind;
use tracing::{debug, trace, warn};

use crate::destination::executor::{SqlExecutor, Statement};
use crate::destination::{LoadCounts, Loader, Tabulated};
use crate::error::SyncResult;
use crate::schema::{DEFAULT_PRIMARY_KEY, Dialect, SchemaAdapter, SnowflakeDialect};
use crate::types::{DestinationKind, LoadTarget, Record};

/// Default number of rows per multi-row `INSERT`.
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;

/// Loader for the columnar warehouse.
///
/// The warehouse has no native upsert, so each batch is inserted into a staging table created
/// `LIKE` the target and reconciled with a single `MERGE` on the primary key. The staging table
/// is dropped afterwards whether or not the merge succeeded.
///
/// A `MERGE` reports every matched row as affected, so this loader only fills
/// [`LoadCounts::affected`].
#[derive(Debug)]
pub struct ColumnStoreLoader {
    executor: Arc<dyn SqlExecutor>,
    dialect: Arc<dyn Dialect>,
    schema: SchemaAdapter,
    staging_kind: StagingTableKind,
    insert_chunk_size: usize,
}

impl ColumnStoreLoader {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        let dialect: Arc<dyn Dialect> = Arc::new(SnowflakeDialect);
        let schema = SchemaAdapter::new(Arc::clone(&dialect), Arc::clone(&executor));

        Self {
            executor,
            dialect,
            schema,
            staging_kind: StagingTableKind::default(),
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        }
    }

    pub fn with_staging_kind(mut self, staging_kind: StagingTableKind) -> Self {
        self.staging_kind = staging_kind;
        self
    }

    pub fn with_insert_chunk_size(mut self, insert_chunk_size: usize) -> Self {
        self.insert_chunk_size = insert_chunk_size.max(1);
        self
    }

    fn staging_name(&self, table: &str) -> String {
        self.dialect
            .normalize_identifier(&format!("{table}_stage_{}", Utc::now().timestamp_millis()))
    }

    fn create_staging_statement(&self, staging: &str, table: &str) -> Statement {
        let kind = match self.staging_kind {
            StagingTableKind::Transient => "TRANSIENT",
            StagingTableKind::Temporary => "TEMPORARY",
        };

        Statement::new(format!(
            "CREATE {kind} TABLE {} LIKE {}",
            self.dialect.quote_identifier(staging),
            self.dialect.quote_identifier(table)
        ))
    }

    /// Builds chunked multi-row inserts with one bound parameter per value.
    fn insert_statements(&self, table: &str, rows: &Tabulated) -> Vec<Statement> {
        let columns = rows
            .columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = format!("({})", vec!["?"; rows.columns.len()].join(", "));

        rows.rows
            .chunks(self.insert_chunk_size)
            .map(|chunk| {
                let values = vec![placeholders.as_str(); chunk.len()].join(", ");
                let params = chunk.iter().flatten().cloned().collect();
                Statement::with_params(
                    format!(
                        "INSERT INTO {} ({columns}) VALUES {values}",
                        self.dialect.quote_identifier(table)
                    ),
                    params,
                )
            })
            .collect()
    }

    fn merge_statement(&self, table: &str, staging: &str, columns: &[String], key: &str) -> Statement {
        let quoted: Vec<String> = columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect();
        let key = self.dialect.quote_identifier(key);

        let updates: Vec<String> = quoted
            .iter()
            .filter(|column| **column != key)
            .map(|column| format!("t.{column} = s.{column}"))
            .collect();
        let matched = if updates.is_empty() {
            String::new()
        } else {
            format!(" WHEN MATCHED THEN UPDATE SET {}", updates.join(", "))
        };
        let source_values: Vec<String> = quoted.iter().map(|c| format!("s.{c}")).collect();

        Statement::new(format!(
            "MERGE INTO {} t USING {} s ON t.{key} = s.{key}{matched} WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            self.dialect.quote_identifier(table),
            self.dialect.quote_identifier(staging),
            quoted.join(", "),
            source_values.join(", ")
        ))
    }

    fn copy_statement(&self, table: &str, staging: &str, columns: &[String]) -> Statement {
        let quoted = columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");

        Statement::new(format!(
            "INSERT INTO {} ({quoted}) SELECT {quoted} FROM {}",
            self.dialect.quote_identifier(table),
            self.dialect.quote_identifier(staging)
        ))
    }

    async fn execute_logged(&self, statement: &Statement) -> SyncResult<u64> {
        trace!(sql = %statement.sql, params = statement.params.len(), "executing statement");
        self.executor.execute(statement).await.inspect_err(|err| {
            warn!(sql = %statement.sql, error = %err, "column store statement failed");
        })
    }

    /// Loads `rows` into a fresh staging table and reconciles it with `table`.
    async fn stage_and_merge(
        &self,
        table: &str,
        staging: &str,
        rows: &Tabulated,
        key: Option<&str>,
    ) -> SyncResult<u64> {
        self.execute_logged(&self.create_staging_statement(staging, table))
            .await?;
        for statement in self.insert_statements(staging, rows) {
            self.execute_logged(&statement).await?;
        }

        let reconcile = match key {
            Some(key) => self.merge_statement(table, staging, &rows.columns, key),
            None => self.copy_statement(table, staging, &rows.columns),
        };

        self.execute_logged(&reconcile).await
    }
}

#[async_trait]
impl Loader for ColumnStoreLoader {
    fn kind(&self) -> DestinationKind {
        DestinationKind::ColumnStore
    }

    async fn load_batch(&mut self, target: &LoadTarget, batch: &[Record]) -> SyncResult<LoadCounts> {
        let mut counts = LoadCounts {
            input: batch.len() as u64,
            ..LoadCounts::default()
        };
        if batch.is_empty() {
            return Ok(counts);
        }

        let live = self
            .schema
            .ensure_schema(&target.table, target.primary_key.as_deref(), batch)
            .await?;

        let mut rows = Tabulated::new(batch, |name| self.dialect.normalize_identifier(name));
        let key = self.dialect.normalize_identifier(
            live.primary_key
                .as_deref()
                .or(target.primary_key.as_deref())
                .unwrap_or(DEFAULT_PRIMARY_KEY),
        );
        // A key missing from the data is generated by the table, so rows are only appended.
        let key = match rows.column_index(&key) {
            Some(index) => {
                counts.duplicates = rows.dedup_by_key(index);
                Some(key)
            }
            None => None,
        };

        let staging = self.staging_name(&live.name);
        let result = self
            .stage_and_merge(&live.name, &staging, &rows, key.as_deref())
            .await;

        if let Err(err) = self.executor.execute(&self.dialect.drop_table(&staging)).await {
            warn!(staging = %staging, error = %err, "failed to drop staging table");
        }

        match result {
            Ok(affected) => counts.affected = affected,
            Err(err) => {
                warn!(table = %live.name, error = %err, "failed to merge batch into column store");
                counts.failed = counts.input;
            }
        }

        debug!(
            table = %live.name,
            affected = counts.affected,
            failed = counts.failed,
            duplicates = counts.duplicates,
            "loaded batch into column store"
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
        let rows = Tabulated::new(rows, |name| self.dialect.normalize_identifier(name));

        let mut written = 0;
        for statement in self.insert_statements(&live.name, &rows) {
            written += self.execute_logged(&statement).await?;
        }

        Ok(written)
    }

    async fn shutdown(&mut self) -> SyncResult<()> {
        self.executor.close().await
    }
}
