use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Paging and statement sizing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Records requested per source page, unless a table overrides it.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Rows per multi-row `INSERT` statement when bulk loading.
    #[serde(default = "default_insert_chunk_size")]
    pub insert_chunk_size: usize,
}

impl BatchConfig {
    pub const DEFAULT_PAGE_SIZE: usize = 1000;

    pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page_size == 0 {
            return Err(ValidationError::invalid(
                "batch.page_size",
                "must be greater than 0",
            ));
        }
        if self.insert_chunk_size == 0 {
            return Err(ValidationError::invalid(
                "batch.insert_chunk_size",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            insert_chunk_size: default_insert_chunk_size(),
        }
    }
}

fn default_page_size() -> usize {
    BatchConfig::DEFAULT_PAGE_SIZE
}

fn default_insert_chunk_size() -> usize {
    BatchConfig::DEFAULT_INSERT_CHUNK_SIZE
}
