use serde::{Deserialize, Serialize};

/// Where each destination keeps its checkpoints.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointConfig {
    #[serde(default = "default_table")]
    pub table: String,
}

impl CheckpointConfig {
    pub const DEFAULT_TABLE: &'static str = "sync_status";
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
        }
    }
}

fn default_table() -> String {
    CheckpointConfig::DEFAULT_TABLE.to_string()
}
