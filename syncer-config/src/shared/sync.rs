use std::collections::HashSet;

use serde::Deserialize;

use crate::shared::{
    AuditConfig, BatchConfig, CheckpointConfig, ColumnStoreConfig, RowStoreConfig, SearchConfig,
    SourceConfig, TableConfig, ValidationError,
};

/// Complete configuration of the sync binary.
///
/// This intentionally does not implement `Serialize` to avoid leaking secrets.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub row_store: Option<RowStoreConfig>,
    #[serde(default)]
    pub column_store: Option<ColumnStoreConfig>,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        if self.row_store.is_none() && self.column_store.is_none() {
            return Err(ValidationError::NoDestination);
        }
        if let Some(row_store) = &self.row_store {
            row_store.validate()?;
        }
        if let Some(column_store) = &self.column_store {
            column_store.validate()?;
        }
        self.batch.validate()?;
        self.search.validate()?;

        let mut seen = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            if !seen.insert(table.dest_table.to_lowercase()) {
                return Err(ValidationError::DuplicateTable(table.dest_table.clone()));
            }
        }

        Ok(())
    }
}
