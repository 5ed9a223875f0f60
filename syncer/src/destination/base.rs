use std::fmt;

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::types::{DestinationKind, LoadTarget, Record};

/// Row counts produced by loading batches into one destination table.
///
/// Row stores classify every row as inserted, updated or unchanged. Column stores only know how
/// many rows a `MERGE` touched, which is reported in `affected` and leaves the other three
/// buckets at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadCounts {
    /// Rows handed to the loader.
    pub input: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Rows touched according to the destination, whether or not a value changed.
    pub affected: u64,
    /// Rows whose statement failed and were neither inserted nor updated.
    pub failed: u64,
    /// Rows sharing a primary key with an earlier row of the same batch.
    pub duplicates: u64,
}

impl LoadCounts {
    pub fn merge(&mut self, other: &LoadCounts) {
        self.input += other.input;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.affected += other.affected;
        self.failed += other.failed;
        self.duplicates += other.duplicates;
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for LoadCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input={} inserted={} updated={} unchanged={} affected={} failed={} duplicates={}",
            self.input,
            self.inserted,
            self.updated,
            self.unchanged,
            self.affected,
            self.failed,
            self.duplicates
        )
    }
}

/// Delivers batches of mapped records to one destination.
///
/// A loader owns its connection and its schema cache, so it must not be shared between
/// concurrent table workers. Loads are idempotent: applying the same batch twice leaves the
/// destination unchanged the second time.
///
/// Failures of single rows are counted in [`LoadCounts::failed`] and do not fail the call.
/// Returned errors abort the current table on this destination only.
#[async_trait]
pub trait Loader: Send + fmt::Debug {
    fn kind(&self) -> DestinationKind;

    /// Inserts or updates every record of `batch` keyed by the target's primary key, creating
    /// or widening the table first.
    async fn load_batch(&mut self, target: &LoadTarget, batch: &[Record]) -> SyncResult<LoadCounts>;

    /// Appends `rows` without matching existing keys. Returns the number of rows written.
    async fn append_rows(&mut self, target: &LoadTarget, rows: &[Record]) -> SyncResult<u64>;

    /// Releases the loader's connection. The default implementation does nothing.
    async fn shutdown(&mut self) -> SyncResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_counts() {
        let mut total = LoadCounts {
            input: 3,
            inserted: 1,
            updated: 1,
            unchanged: 1,
            ..LoadCounts::default()
        };

        total.merge(&LoadCounts {
            input: 2,
            affected: 2,
            failed: 1,
            duplicates: 1,
            ..LoadCounts::default()
        });

        assert_eq!(total.input, 5);
        assert_eq!(total.affected, 2);
        assert_eq!(total.failed, 1);
        assert!(total.has_failures());
        assert_eq!(
            total.to_string(),
            "input=5 inserted=1 updated=1 unchanged=1 affected=2 failed=1 duplicates=1"
        );
    }
}
