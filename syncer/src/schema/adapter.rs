use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::destination::executor::SqlExecutor;
use crate::error::{ErrorKind, SyncResult};
use crate::schema::dialect::lists_table;
use crate::schema::{
    ColumnDef, DEFAULT_PRIMARY_KEY, Dialect, LiveTable, infer_columns, plan_primary_key,
};
use crate::sync_error;
use crate::types::Record;

/// Keeps a destination table's columns a superset of every batch loaded into it.
///
/// The adapter caches the live shape of the table it is currently working on. Switching to a
/// different table drops the cache, so columns inferred for one table never leak into another.
/// Each loader owns its own adapter.
#[derive(Debug)]
pub struct SchemaAdapter {
    dialect: Arc<dyn Dialect>,
    executor: Arc<dyn SqlExecutor>,
    active: Option<LiveTable>,
}

impl SchemaAdapter {
    pub fn new(dialect: Arc<dyn Dialect>, executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            dialect,
            executor,
            active: None,
        }
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// Name of the table whose shape is currently cached.
    pub fn active_table(&self) -> Option<&str> {
        self.active.as_ref().map(|live| live.name.as_str())
    }

    /// Creates or widens `table` so it holds every column present in `batch`.
    ///
    /// Failed `CREATE` and `ALTER` statements are logged and tolerated: the subsequent load
    /// fails on its own if the table really is missing columns. Failures to read the live
    /// table are returned.
    pub async fn ensure_schema(
        &mut self,
        table: &str,
        primary_key: Option<&str>,
        batch: &[Record],
    ) -> SyncResult<LiveTable> {
        let table = self.dialect.normalize_identifier(table);
        self.activate(&table);

        let dialect = Arc::clone(&self.dialect);
        let mut columns = infer_columns(batch, |name| dialect.normalize_identifier(name));

        let mut live = match self.active.take() {
            Some(live) => live,
            None => {
                if self.table_exists(&table).await? {
                    self.describe(&table).await?
                } else {
                    self.create(&table, primary_key, &mut columns).await
                }
            }
        };

        let missing: Vec<ColumnDef> = columns
            .into_iter()
            .filter(|column| !live.has_column(&column.name))
            .collect();

        if !missing.is_empty() {
            let statement = self.dialect.add_columns(&table, &missing);
            match self.executor.execute(&statement).await {
                Ok(_) => {
                    info!(
                        table = %table,
                        columns = ?missing.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                        "added new columns to destination table"
                    );
                    live.columns.extend(missing.into_iter().map(|c| c.name));
                }
                Err(err) => {
                    warn!(
                        table = %table,
                        statement = %statement.sql,
                        error = %err,
                        "failed to add columns, continuing with the existing schema"
                    );
                }
            }
        }

        self.active = Some(live.clone());

        Ok(live)
    }

    /// Makes `table` the active table, dropping the cached shape of any other table.
    fn activate(&mut self, table: &str) {
        if self.active_table() != Some(table) {
            if let Some(previous) = self.active.take() {
                debug!(previous = %previous.name, next = %table, "switching active table");
            }
        }
    }

    /// Forgets the cached shape so the next call re-reads the live table.
    pub fn invalidate(&mut self) {
        self.active = None;
    }

    pub async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        let rows = self
            .executor
            .query(&self.dialect.table_exists(table))
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::DestinationQueryFailed,
                    "Failed to check whether the destination table exists",
                    format!("table `{table}`: {err}")
                )
            })?;

        Ok(lists_table(&rows, table))
    }

    async fn describe(&self, table: &str) -> SyncResult<LiveTable> {
        let rows = self
            .executor
            .query(&self.dialect.describe_table(table))
            .await
            .map_err(|err| {
                sync_error!(
                    ErrorKind::DestinationQueryFailed,
                    "Failed to read destination table columns",
                    format!("table `{table}`: {err}")
                )
            })?;

        Ok(self.dialect.parse_description(table, &rows))
    }

    async fn create(
        &self,
        table: &str,
        primary_key: Option<&str>,
        columns: &mut Vec<ColumnDef>,
    ) -> LiveTable {
        let key_name = self
            .dialect
            .normalize_identifier(primary_key.unwrap_or(DEFAULT_PRIMARY_KEY));
        let key = plan_primary_key(columns, &key_name);
        let statement = self.dialect.create_table(table, columns, &key);

        match self.executor.execute(&statement).await {
            Ok(_) => info!(table = %table, primary_key = %key.column, "created destination table"),
            Err(err) => warn!(
                table = %table,
                statement = %statement.sql,
                error = %err,
                "failed to create destination table"
            ),
        }

        // Every column is part of the create statement, so nothing is left to add.
        LiveTable {
            name: table.to_string(),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            primary_key: Some(key.column),
            auto_increment: key.synthesized,
        }
    }
}
