use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How incremental searches are rendered.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SearchConfig {
    /// `strftime` format of timestamps inside search criteria, as the source expects them.
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    /// Lower bound for tables without a checkpoint, as `YYYY-MM-DD HH:MM:SS`.
    #[serde(default = "default_epoch")]
    pub default_epoch: String,
    /// When set, incremental searches cover at most this many days per run.
    #[serde(default)]
    pub window_days: Option<u32>,
}

impl SearchConfig {
    pub const DEFAULT_TIMESTAMP_FORMAT: &'static str = "%m/%d/%Y %H:%M:%S";

    pub const DEFAULT_EPOCH: &'static str = "2020-01-01 00:00:00";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timestamp_format.trim().is_empty() {
            return Err(ValidationError::invalid(
                "search.timestamp_format",
                "cannot be empty",
            ));
        }
        if self.window_days == Some(0) {
            return Err(ValidationError::invalid(
                "search.window_days",
                "must be greater than 0 when set",
            ));
        }

        Ok(())
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timestamp_format: default_timestamp_format(),
            default_epoch: default_epoch(),
            window_days: None,
        }
    }
}

fn default_timestamp_format() -> String {
    SearchConfig::DEFAULT_TIMESTAMP_FORMAT.to_string()
}

fn default_epoch() -> String {
    SearchConfig::DEFAULT_EPOCH.to_string()
}
