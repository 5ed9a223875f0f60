use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// One `field -> criterion` pair of a find group.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriterionConfig {
    pub field: String,
    pub value: String,
}

/// A find group of a table's search.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchGroupConfig {
    pub criteria: Vec<CriterionConfig>,
    /// Excludes records matching this group.
    #[serde(default)]
    pub omit: bool,
}

/// Renames a source field to a destination column.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMappingConfig {
    pub source: String,
    pub dest: String,
}

/// Extracts procedure codes from one column into another.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeExtractionConfig {
    pub source_field: String,
    pub target_field: String,
}

/// How one source table is synchronized.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TableConfig {
    pub source_table: String,
    pub dest_table: String,
    /// `None` lets the destination add an auto-incrementing `id`.
    #[serde(default)]
    pub primary_key: Option<String>,
    pub search: Vec<SearchGroupConfig>,
    #[serde(default)]
    pub columns: Vec<ColumnMappingConfig>,
    /// Re-reads the whole day before the checkpoint on every run.
    #[serde(default)]
    pub requires_day_subtraction: bool,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub code_extraction: Option<CodeExtractionConfig>,
}

impl TableConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let field = |name: &str| format!("tables.{}.{name}", self.dest_table);

        if self.dest_table.trim().is_empty() {
            return Err(ValidationError::invalid("tables.dest_table", "cannot be empty"));
        }
        if self.source_table.trim().is_empty() {
            return Err(ValidationError::invalid(field("source_table"), "cannot be empty"));
        }
        if !self.search.iter().any(|group| !group.omit) {
            return Err(ValidationError::invalid(
                field("search"),
                "needs at least one group without `omit`",
            ));
        }
        if self
            .search
            .iter()
            .any(|group| group.criteria.is_empty())
        {
            return Err(ValidationError::invalid(
                field("search"),
                "cannot contain a group without criteria",
            ));
        }
        if self.page_size == Some(0) {
            return Err(ValidationError::invalid(
                field("page_size"),
                "must be greater than 0 when set",
            ));
        }

        Ok(())
    }
}
