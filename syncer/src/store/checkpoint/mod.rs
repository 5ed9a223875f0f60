//! Per-destination persistence of sync checkpoints.
//!
//! A checkpoint is the last source modification timestamp a destination has fully loaded for a
//! table. Each destination owns its own [`CheckpointStore`], so the two destinations of a table
//! advance independently.

mod memory;
mod sql;

pub use memory::MemoryCheckpointStore;
pub use sql::SqlCheckpointStore;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::SyncResult;

/// Default name of the table holding checkpoints.
pub const DEFAULT_CHECKPOINT_TABLE: &str = "sync_status";

/// Storage of `table name -> last synced timestamp` for one destination.
///
/// A missing checkpoint is not an error: callers fall back to their default epoch.
#[async_trait]
pub trait CheckpointStore: Send + Sync + fmt::Debug {
    /// Returns the stored checkpoint of `table`, if any.
    async fn get_checkpoint(&self, table: &str) -> SyncResult<Option<NaiveDateTime>>;

    /// Unconditionally writes the checkpoint of `table`.
    async fn store_checkpoint(&self, table: &str, timestamp: NaiveDateTime) -> SyncResult<()>;

    /// Writes `timestamp` unless the stored checkpoint is already later, returning the value
    /// that is stored afterwards.
    async fn advance_checkpoint(
        &self,
        table: &str,
        timestamp: NaiveDateTime,
    ) -> SyncResult<NaiveDateTime> {
        if let Some(current) = self.get_checkpoint(table).await? {
            if current >= timestamp {
                debug!(
                    table,
                    %current,
                    candidate = %timestamp,
                    "stored checkpoint is not older, keeping it"
                );
                return Ok(current);
            }
        }

        self.store_checkpoint(table, timestamp).await?;

        Ok(timestamp)
    }

    /// Moves every stored checkpoint aside so the next run starts from the default epoch.
    ///
    /// Returns the name the checkpoints were archived under, or `None` when there was nothing
    /// to archive.
    async fn archive_checkpoints(&self, now: NaiveDateTime) -> SyncResult<Option<String>>;

    /// Deletes every stored checkpoint.
    async fn reset_checkpoints(&self) -> SyncResult<()>;
}

/// Name an archived checkpoint table is renamed to.
pub fn archive_name(table: &str, now: &NaiveDateTime) -> String {
    format!("{table}_{}", now.and_utc().timestamp())
}
