use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::Mutex;
use tracing::info;

use crate::destination::executor::SqlExecutor;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::schema::Dialect;
use crate::schema::dialect::{lists_table, text_field};
use crate::store::checkpoint::{CheckpointStore, archive_name};
use crate::sync_error;
use crate::types::parse_timestamp;

/// Checkpoint column read back by [`SqlCheckpointStore::get_checkpoint`].
const TIMESTAMP_COLUMN: &str = "last_synced_timestamp";

/// [`CheckpointStore`] backed by a table in the destination itself.
///
/// The table is created on the first write. Reads before that find no table and report no
/// checkpoint.
#[derive(Debug)]
pub struct SqlCheckpointStore {
    dialect: Arc<dyn Dialect>,
    executor: Arc<dyn SqlExecutor>,
    table: String,
    /// `true` once the table is known to exist.
    ready: Mutex<bool>,
}

impl SqlCheckpointStore {
    pub fn new(
        dialect: Arc<dyn Dialect>,
        executor: Arc<dyn SqlExecutor>,
        table: impl Into<String>,
    ) -> Self {
        let table = dialect.normalize_identifier(&table.into());

        Self {
            dialect,
            executor,
            table,
            ready: Mutex::new(false),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn table_exists(&self) -> SyncResult<bool> {
        let rows = self
            .executor
            .query(&self.dialect.table_exists(&self.table))
            .await
            .map_err(|err| store_error("Failed to look up the checkpoint table", err))?;

        Ok(lists_table(&rows, &self.table))
    }

    /// Returns `true` when the table exists, remembering a positive answer.
    async fn check_ready(&self, ready: &mut bool) -> SyncResult<bool> {
        if !*ready {
            *ready = self.table_exists().await?;
        }

        Ok(*ready)
    }

    async fn ensure_table(&self, ready: &mut bool) -> SyncResult<()> {
        if self.check_ready(ready).await? {
            return Ok(());
        }

        self.executor
            .execute(&self.dialect.create_checkpoint_table(&self.table))
            .await
            .map_err(|err| store_error("Failed to create the checkpoint table", err))?;
        info!(table = %self.table, "created checkpoint table");
        *ready = true;

        Ok(())
    }
}

fn store_error(description: &'static str, err: SyncError) -> SyncError {
    sync_error!(ErrorKind::CheckpointStoreFailed, description, err)
}

#[async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn get_checkpoint(&self, table: &str) -> SyncResult<Option<NaiveDateTime>> {
        let mut ready = self.ready.lock().await;
        if !self.check_ready(&mut ready).await? {
            return Ok(None);
        }

        let rows = self
            .executor
            .query(&self.dialect.select_checkpoint(&self.table, table))
            .await
            .map_err(|err| store_error("Failed to read checkpoint", err))?;

        Ok(rows
            .first()
            .and_then(|row| text_field(row, TIMESTAMP_COLUMN))
            .and_then(parse_timestamp))
    }

    async fn store_checkpoint(&self, table: &str, timestamp: NaiveDateTime) -> SyncResult<()> {
        let mut ready = self.ready.lock().await;
        self.ensure_table(&mut ready).await?;

        self.executor
            .execute(&self.dialect.upsert_checkpoint(&self.table, table, &timestamp))
            .await
            .map_err(|err| store_error("Failed to write checkpoint", err))?;

        Ok(())
    }

    async fn archive_checkpoints(&self, now: NaiveDateTime) -> SyncResult<Option<String>> {
        let mut ready = self.ready.lock().await;
        if !self.check_ready(&mut ready).await? {
            return Ok(None);
        }

        let archived = self
            .dialect
            .normalize_identifier(&archive_name(&self.table, &now));
        self.executor
            .execute(&self.dialect.rename_table(&self.table, &archived))
            .await
            .map_err(|err| store_error("Failed to archive the checkpoint table", err))?;
        *ready = false;
        info!(table = %self.table, archived = %archived, "archived checkpoint table");

        Ok(Some(archived))
    }

    async fn reset_checkpoints(&self) -> SyncResult<()> {
        let mut ready = self.ready.lock().await;
        if !self.check_ready(&mut ready).await? {
            return Ok(());
        }

        self.executor
            .execute(&self.dialect.truncate_table(&self.table))
            .await
            .map_err(|err| store_error("Failed to reset the checkpoint table", err))?;
        info!(table = %self.table, "reset checkpoint table");

        Ok(())
    }
}
