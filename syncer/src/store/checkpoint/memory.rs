use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::store::checkpoint::{CheckpointStore, DEFAULT_CHECKPOINT_TABLE, archive_name};

#[derive(Debug, Default)]
struct Inner {
    checkpoints: BTreeMap<String, NaiveDateTime>,
    /// Archived checkpoint sets keyed by archive name.
    archives: BTreeMap<String, BTreeMap<String, NaiveDateTime>>,
    /// Every write in order, used to inspect checkpoint history.
    writes: Vec<(String, NaiveDateTime)>,
}

/// In-memory [`CheckpointStore`].
///
/// Checkpoints are lost on process restart. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding the given checkpoints.
    pub fn with_checkpoints<I, S>(checkpoints: I) -> Self
    where
        I: IntoIterator<Item = (S, NaiveDateTime)>,
        S: Into<String>,
    {
        let inner = Inner {
            checkpoints: checkpoints
                .into_iter()
                .map(|(table, timestamp)| (table.into(), timestamp))
                .collect(),
            ..Inner::default()
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn checkpoints(&self) -> BTreeMap<String, NaiveDateTime> {
        self.inner.lock().await.checkpoints.clone()
    }

    pub async fn archives(&self) -> BTreeMap<String, BTreeMap<String, NaiveDateTime>> {
        self.inner.lock().await.archives.clone()
    }

    pub async fn writes(&self) -> Vec<(String, NaiveDateTime)> {
        self.inner.lock().await.writes.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_checkpoint(&self, table: &str) -> SyncResult<Option<NaiveDateTime>> {
        let inner = self.inner.lock().await;

        Ok(inner.checkpoints.get(table).copied())
    }

    async fn store_checkpoint(&self, table: &str, timestamp: NaiveDateTime) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.checkpoints.insert(table.to_string(), timestamp);
        inner.writes.push((table.to_string(), timestamp));

        Ok(())
    }

    async fn archive_checkpoints(&self, now: NaiveDateTime) -> SyncResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        if inner.checkpoints.is_empty() {
            return Ok(None);
        }

        let name = archive_name(DEFAULT_CHECKPOINT_TABLE, &now);
        let archived = std::mem::take(&mut inner.checkpoints);
        inner.archives.insert(name.clone(), archived);

        Ok(Some(name))
    }

    async fn reset_checkpoints(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.checkpoints.clear();

        Ok(())
    }
}
