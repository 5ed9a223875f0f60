use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

const fn default_request_timeout_secs() -> u64 {
    SourceConfig::DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_layout_suffix() -> String {
    SourceConfig::DEFAULT_LAYOUT_SUFFIX.to_string()
}

/// Connection to the FileMaker Data API.
///
/// This intentionally does not implement `Serialize` to avoid leaking the password.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    /// Base URL of the FileMaker server, e.g. `https://fm.example.com`.
    pub host: String,
    pub database: String,
    pub username: String,
    pub password: SecretString,
    /// Appended to each source table name to form the layout that is queried.
    #[serde(default = "default_layout_suffix")]
    pub layout_suffix: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl SourceConfig {
    pub const DEFAULT_LAYOUT_SUFFIX: &'static str = "_data_warehouse";

    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::invalid("source.host", "cannot be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(ValidationError::invalid(
                "source.database",
                "cannot be empty",
            ));
        }

        Ok(())
    }
}
