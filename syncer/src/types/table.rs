use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use syncer_config::shared::TableConfig;

use crate::error::{ErrorKind, SyncError};
use crate::search::{SearchCriterion, SearchGroup, SearchTemplate};
use crate::{bail, sync_error};

/// Source fields that carry a modification timestamp and can drive incremental extraction.
pub const VALID_TIMESTAMP_FIELDS: &[&str] = &["modificationHostTimestamp", "timestamp"];

/// The destination families a table can be delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DestinationKind {
    /// Relational row store with native upsert.
    RowStore,
    /// Columnar warehouse loaded through a staging table and `MERGE`.
    ColumnStore,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::RowStore => "row_store",
            DestinationKind::ColumnStore => "column_store",
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationKind {
    type Err = SyncError;

    /// Accepts both the family names and the product names used on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "row_store" | "row-store" | "rds" | "mysql" => Ok(DestinationKind::RowStore),
            "column_store" | "column-store" | "snowflake" => Ok(DestinationKind::ColumnStore),
            other => Err(sync_error!(
                ErrorKind::ConfigError,
                "Unknown destination target",
                format!("`{other}` is not one of rds, snowflake, row_store, column_store")
            )),
        }
    }
}

/// Derives a per-record field from the text of another field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeExtraction {
    /// Destination column holding the free text.
    pub source_field: String,
    /// Destination column receiving the comma-joined codes.
    pub target_field: String,
}

/// Static description of how one source table is synchronized.
///
/// Built once from configuration at startup and never mutated during a run.
#[derive(Debug, Clone)]
pub struct TableSyncDescriptor {
    /// Layout (table) name in the source.
    pub source_table: String,
    /// Table name in both destinations.
    pub dest_table: String,
    pub search_template: SearchTemplate,
    /// Source field name to destination column name.
    pub column_map: BTreeMap<String, String>,
    pub primary_key: Option<String>,
    pub requires_day_subtraction: bool,
    /// Overrides the run's default page size.
    pub page_size: Option<usize>,
    /// Source field used to sort pages and advance the checkpoint.
    pub timestamp_field: String,
    pub code_extraction: Option<CodeExtraction>,
}

impl TableSyncDescriptor {
    /// Returns `true` when the search template carries the watermark placeholder.
    pub fn is_timestamp_incremental(&self) -> bool {
        self.search_template.contains_watermark()
    }

    /// Destination column holding the timestamp that advances the checkpoint.
    pub fn timestamp_column(&self) -> &str {
        self.column_map
            .get(&self.timestamp_field)
            .map(String::as_str)
            .unwrap_or(&self.timestamp_field)
    }

    pub fn page_size(&self, default: usize) -> usize {
        self.page_size.unwrap_or(default).max(1)
    }

    /// Picks the sort field from the first valid timestamp field named in the template.
    pub fn detect_timestamp_field(template: &SearchTemplate) -> String {
        VALID_TIMESTAMP_FIELDS
            .iter()
            .find(|field| template.references_field(field))
            .unwrap_or(&VALID_TIMESTAMP_FIELDS[0])
            .to_string()
    }
}

impl TryFrom<&TableConfig> for TableSyncDescriptor {
    type Error = SyncError;

    fn try_from(config: &TableConfig) -> Result<Self, Self::Error> {
        if config.dest_table.trim().is_empty() || config.source_table.trim().is_empty() {
            bail!(
                ErrorKind::InvalidTableDescriptor,
                "Table descriptors need a source and a destination table",
                format!("`{}` -> `{}`", config.source_table, config.dest_table)
            );
        }

        let groups = config
            .search
            .iter()
            .map(|group| {
                let criteria = group
                    .criteria
                    .iter()
                    .map(|c| SearchCriterion::new(c.field.as_str(), c.value.as_str()))
                    .collect();
                if group.omit {
                    SearchGroup::omitted(criteria)
                } else {
                    SearchGroup::new(criteria)
                }
            })
            .collect();
        let search_template = SearchTemplate::new(groups);

        let mut column_map = BTreeMap::new();
        for mapping in &config.columns {
            if let Some(previous) = column_map.insert(mapping.source.clone(), mapping.dest.clone()) {
                bail!(
                    ErrorKind::InvalidTableDescriptor,
                    "A source field is mapped twice",
                    format!(
                        "table `{}`: `{}` maps to both `{previous}` and `{}`",
                        config.dest_table, mapping.source, mapping.dest
                    )
                );
            }
        }

        Ok(TableSyncDescriptor {
            source_table: config.source_table.clone(),
            dest_table: config.dest_table.clone(),
            timestamp_field: TableSyncDescriptor::detect_timestamp_field(&search_template),
            search_template,
            column_map,
            primary_key: config.primary_key.clone(),
            requires_day_subtraction: config.requires_day_subtraction,
            page_size: config.page_size,
            code_extraction: config.code_extraction.as_ref().map(|rule| CodeExtraction {
                source_field: rule.source_field.clone(),
                target_field: rule.target_field.clone(),
            }),
        })
    }
}

/// Identifies a destination table and its key for a load call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub table: String,
    /// `None` means the destination synthesizes an auto-incrementing key.
    pub primary_key: Option<String>,
}

impl LoadTarget {
    pub fn new(table: impl Into<String>, primary_key: Option<impl Into<String>>) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.map(Into::into),
        }
    }

    pub fn for_descriptor(descriptor: &TableSyncDescriptor) -> Self {
        Self {
            table: descriptor.dest_table.clone(),
            primary_key: descriptor.primary_key.clone(),
        }
    }
}
