use serde::{Deserialize, Serialize};

/// Audit log written after every table that processed records.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AuditConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

impl AuditConfig {
    pub const DEFAULT_TABLE: &'static str = "etl_log";

    pub const DEFAULT_PRIMARY_KEY: &'static str = "id";
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            table: default_table(),
            primary_key: default_primary_key(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_table() -> String {
    AuditConfig::DEFAULT_TABLE.to_string()
}

fn default_primary_key() -> String {
    AuditConfig::DEFAULT_PRIMARY_KEY.to_string()
}
