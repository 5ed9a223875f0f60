use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

const fn default_mysql_port() -> u16 {
    RowStoreConfig::DEFAULT_PORT
}

const fn default_max_connections() -> u32 {
    RowStoreConfig::DEFAULT_MAX_CONNECTIONS
}

const fn default_column_store_timeout_secs() -> u64 {
    ColumnStoreConfig::DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Connection to the MySQL row store.
///
/// This intentionally does not implement [`Serialize`] to avoid leaking the password.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RowStoreConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: SecretString,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl RowStoreConfig {
    pub const DEFAULT_PORT: u16 = 3306;

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::invalid("row_store.host", "cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(ValidationError::invalid(
                "row_store.max_connections",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Converts connection configuration into driver connect options.
#[cfg(feature = "mysql")]
pub trait IntoConnectOptions<Output> {
    fn with_db(&self) -> Output;
}

#[cfg(feature = "mysql")]
impl IntoConnectOptions<sqlx::mysql::MySqlConnectOptions> for RowStoreConfig {
    fn with_db(&self) -> sqlx::mysql::MySqlConnectOptions {
        use secrecy::ExposeSecret;

        sqlx::mysql::MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret())
            .database(&self.database)
            .charset("utf8mb4")
    }
}

/// Kind of table used to stage batches before merging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingTableKind {
    /// Survives the session, so it works when every statement runs in its own session.
    #[default]
    Transient,
    /// Dropped with the session.
    Temporary,
}

/// Token type sent with column store API requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnowflakeTokenType {
    #[default]
    ProgrammaticAccessToken,
    KeypairJwt,
    Oauth,
}

impl SnowflakeTokenType {
    /// Value of the `X-Snowflake-Authorization-Token-Type` header.
    pub fn header_value(&self) -> &'static str {
        match self {
            SnowflakeTokenType::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
            SnowflakeTokenType::KeypairJwt => "KEYPAIR_JWT",
            SnowflakeTokenType::Oauth => "OAUTH",
        }
    }
}

/// Connection to the Snowflake column store through its SQL API.
///
/// This intentionally does not implement [`Serialize`] to avoid leaking the token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ColumnStoreConfig {
    /// Account identifier, e.g. `xy12345.us-east-1`.
    pub account: String,
    pub database: String,
    pub schema: String,
    pub warehouse: String,
    #[serde(default)]
    pub role: Option<String>,
    pub token: SecretString,
    #[serde(default)]
    pub token_type: SnowflakeTokenType,
    #[serde(default)]
    pub staging_table_kind: StagingTableKind,
    #[serde(default = "default_column_store_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ColumnStoreConfig {
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

    /// Base URL of the account's SQL API.
    pub fn base_url(&self) -> String {
        format!("https://{}.snowflakecomputing.com", self.account.trim())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("column_store.account", &self.account),
            ("column_store.database", &self.database),
            ("column_store.schema", &self.schema),
            ("column_store.warehouse", &self.warehouse),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::invalid(field, "cannot be empty"));
            }
        }

        Ok(())
    }
}
