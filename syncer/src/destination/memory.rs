use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::destination::{LoadCounts, Loader};
use crate::error::{ErrorKind, SyncResult};
use crate::types::{DestinationKind, LoadTarget, Record};

#[derive(Debug, Default)]
struct Inner {
    /// Rows of every upserted table in first-insert order.
    tables: BTreeMap<String, Vec<Record>>,
    /// Rows written through [`Loader::append_rows`].
    appended: BTreeMap<String, Vec<Record>>,
    /// Tables whose loads fail with a destination error.
    failing_tables: HashSet<String>,
    /// Size of every batch passed to [`Loader::load_batch`], per table.
    batch_sizes: BTreeMap<String, Vec<usize>>,
}

/// In-memory [`Loader`] with upsert semantics.
///
/// Counts follow the destination kind it stands in for: as a row store it classifies rows as
/// inserted, updated or unchanged; as a column store it reports every written or matched row
/// as affected. Clones share the same tables, so a test can keep a handle while the loader is
/// moved into the orchestrator.
#[derive(Debug, Clone)]
pub struct MemoryLoader {
    kind: DestinationKind,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryLoader {
    pub fn new(kind: DestinationKind) -> Self {
        Self {
            kind,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn row_store() -> Self {
        Self::new(DestinationKind::RowStore)
    }

    pub fn column_store() -> Self {
        Self::new(DestinationKind::ColumnStore)
    }

    /// Makes every following load into `table` fail.
    pub async fn fail_table(&self, table: &str) {
        let mut inner = self.inner.lock().await;
        inner.failing_tables.insert(table.to_string());
    }

    pub async fn table_rows(&self, table: &str) -> Vec<Record> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).cloned().unwrap_or_default()
    }

    pub async fn appended_rows(&self, table: &str) -> Vec<Record> {
        let inner = self.inner.lock().await;
        inner.appended.get(table).cloned().unwrap_or_default()
    }

    pub async fn batch_sizes(&self, table: &str) -> Vec<usize> {
        let inner = self.inner.lock().await;
        inner.batch_sizes.get(table).cloned().unwrap_or_default()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.tables.clear();
        inner.appended.clear();
        inner.batch_sizes.clear();
    }
}

/// Applies one record to `rows`, returning `(inserted, updated)`.
fn upsert(rows: &mut Vec<Record>, key: Option<&str>, record: &Record) -> (bool, bool) {
    let key_value = key.and_then(|key| record.get_ignore_case(key).map(|value| (key, value)));
    let existing = key_value.and_then(|(key, value)| {
        rows.iter_mut().find(|row| {
            row.get_ignore_case(key)
                .is_some_and(|stored| stored.loosely_equals(value))
        })
    });

    match existing {
        Some(row) => {
            let changed = record
                .iter()
                .any(|(field, value)| !row.get(field).is_some_and(|stored| stored.loosely_equals(value)));
            if changed {
                for (field, value) in record.iter() {
                    row.insert(field, value.clone());
                }
            }
            (false, changed)
        }
        None => {
            rows.push(record.clone());
            (true, false)
        }
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn kind(&self) -> DestinationKind {
        self.kind
    }

    async fn load_batch(&mut self, target: &LoadTarget, batch: &[Record]) -> SyncResult<LoadCounts> {
        let mut inner = self.inner.lock().await;
        if inner.failing_tables.contains(&target.table) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Memory destination rejected the batch",
                format!("table `{}` is configured to fail", target.table)
            );
        }

        info!(table = %target.table, rows = batch.len(), "writing batch to memory destination");
        inner
            .batch_sizes
            .entry(target.table.clone())
            .or_default()
            .push(batch.len());

        let rows = inner.tables.entry(target.table.clone()).or_default();
        let mut counts = LoadCounts {
            input: batch.len() as u64,
            ..LoadCounts::default()
        };
        let mut seen_keys = HashSet::new();

        for record in batch {
            if let Some(value) = target
                .primary_key
                .as_deref()
                .and_then(|key| record.get_ignore_case(key))
                .and_then(|value| value.render())
            {
                if !seen_keys.insert(value.into_owned()) {
                    counts.duplicates += 1;
                }
            }

            match upsert(rows, target.primary_key.as_deref(), record) {
                (true, _) => counts.inserted += 1,
                (false, true) => counts.updated += 1,
                (false, false) => counts.unchanged += 1,
            }
        }

        match self.kind {
            DestinationKind::RowStore => counts.affected = counts.inserted + counts.updated,
            DestinationKind::ColumnStore => {
                counts.affected = counts.inserted + counts.updated + counts.unchanged;
                counts.inserted = 0;
                counts.updated = 0;
                counts.unchanged = 0;
            }
        }

        Ok(counts)
    }

    async fn append_rows(&mut self, target: &LoadTarget, rows: &[Record]) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        inner
            .appended
            .entry(target.table.clone())
            .or_default()
            .extend(rows.iter().cloned());

        Ok(rows.len() as u64)
    }
}
