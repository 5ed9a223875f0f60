//! Executor for the Snowflake SQL API.
//!
//! Every statement is submitted to `/api/v2/statements` on its own, so each one runs in a
//! fresh session. Statements that outlive the synchronous window come back with `202` and
//! are polled by handle. Results spread over several partitions are fetched one partition
//! at a time.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use syncer::destination::executor::{SqlExecutor, Statement};
use syncer::error::{ErrorKind, SyncError, SyncResult};
use syncer::types::{Record, Value};
use syncer::{bail, sync_error};
use syncer_config::shared::{ColumnStoreConfig, SnowflakeTokenType};
use tokio::time::Instant;
use tracing::{debug, info, trace};

const STATEMENTS_PATH: &str = "/api/v2/statements";
const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowType {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    #[serde(default)]
    num_rows_inserted: u64,
    #[serde(default)]
    num_rows_updated: u64,
    #[serde(default)]
    num_rows_deleted: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
    #[serde(default)]
    stats: Option<Stats>,
}

impl StatementResponse {
    /// Rows changed by a DML statement.
    ///
    /// Statements without stats, like DDL, report zero.
    fn affected_rows(&self) -> u64 {
        match &self.stats {
            Some(stats) => stats.num_rows_inserted + stats.num_rows_updated + stats.num_rows_deleted,
            None => 0,
        }
    }

    fn partition_count(&self) -> usize {
        self.result_set_meta_data
            .as_ref()
            .map_or(1, |meta| meta.partition_info.len().max(1))
    }

    fn describe(&self) -> String {
        format!(
            "[{}] {}",
            self.code.as_deref().unwrap_or("?"),
            self.message.as_deref().unwrap_or("no message")
        )
    }
}

/// Outcome of one API call.
enum Submitted {
    Done(StatementResponse),
    Running(String),
}

/// [`SqlExecutor`] over the Snowflake SQL API.
#[derive(Debug)]
pub struct SnowflakeExecutor {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
    token_type: SnowflakeTokenType,
    database: String,
    schema: String,
    warehouse: String,
    role: Option<String>,
    timeout: Duration,
}

impl SnowflakeExecutor {
    pub fn new(config: &ColumnStoreConfig) -> SyncResult<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                sync_error!(
                    ErrorKind::ConfigError,
                    "Failed to build the column store HTTP client",
                    err
                )
            })?;

        info!(account = %config.account, database = %config.database, "configured column store");

        Ok(Self {
            client,
            base_url: config.base_url(),
            token: config.token.clone(),
            token_type: config.token_type,
            database: config.database.clone(),
            schema: config.schema.clone(),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            timeout,
        })
    }

    fn request_body(&self, statement: &Statement) -> JsonValue {
        let mut body = json!({
            "statement": statement.sql,
            "timeout": self.timeout.as_secs(),
            "database": self.database,
            "schema": self.schema,
            "warehouse": self.warehouse,
        });
        if let Some(role) = &self.role {
            body["role"] = JsonValue::String(role.clone());
        }
        if !statement.params.is_empty() {
            body["bindings"] = bindings(&statement.params);
        }

        body
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(self.token.expose_secret())
            .header(TOKEN_TYPE_HEADER, self.token_type.header_value())
            .header("Accept", "application/json")
    }

    async fn submit(&self, statement: &Statement) -> SyncResult<StatementResponse> {
        let request = self
            .client
            .post(format!("{}{STATEMENTS_PATH}", self.base_url))
            .json(&self.request_body(statement));
        let mut submitted = read_response(self.authorized(request).send().await?).await?;

        let started = Instant::now();
        loop {
            match submitted {
                Submitted::Done(response) => return Ok(response),
                Submitted::Running(handle) => {
                    if started.elapsed() > self.timeout {
                        bail!(
                            ErrorKind::DestinationQueryFailed,
                            "Column store statement timed out",
                            format!("statement handle {handle}")
                        );
                    }
                    debug!(handle = %handle, "statement still running");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    submitted = self.poll(&handle, None).await?;
                }
            }
        }
    }

    async fn poll(&self, handle: &str, partition: Option<usize>) -> SyncResult<Submitted> {
        let mut request = self
            .client
            .get(format!("{}{STATEMENTS_PATH}/{handle}", self.base_url));
        if let Some(partition) = partition {
            request = request.query(&[("partition", partition)]);
        }

        read_response(self.authorized(request).send().await?).await
    }

    /// Fetches the rows of every partition after the first.
    async fn remaining_partitions(&self, response: &mut StatementResponse) -> SyncResult<()> {
        let partitions = response.partition_count();
        let Some(handle) = response.statement_handle.clone() else {
            return Ok(());
        };

        for partition in 1..partitions {
            match self.poll(&handle, Some(partition)).await? {
                Submitted::Done(next) => response.data.extend(next.data),
                Submitted::Running(_) => bail!(
                    ErrorKind::DestinationQueryFailed,
                    "Column store result partition is not ready",
                    format!("statement handle {handle}, partition {partition}")
                ),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for SnowflakeExecutor {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    async fn execute(&self, statement: &Statement) -> SyncResult<u64> {
        trace!(sql = %statement.sql, params = statement.params.len(), "executing statement");

        let response = self.submit(statement).await?;
        Ok(response.affected_rows())
    }

    async fn query(&self, statement: &Statement) -> SyncResult<Vec<Record>> {
        trace!(sql = %statement.sql, params = statement.params.len(), "running query");

        let mut response = self.submit(statement).await?;
        self.remaining_partitions(&mut response).await?;

        Ok(to_records(response))
    }
}

/// Encodes positional parameters as SQL API bindings, keyed from `"1"`.
fn bindings(params: &[Value]) -> JsonValue {
    let mut bindings = Map::with_capacity(params.len());
    for (index, param) in params.iter().enumerate() {
        let kind = match param {
            Value::Null | Value::Text(_) => "TEXT",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "FIXED",
            Value::Float(_) => "REAL",
        };
        let value = match param {
            Value::Bool(b) => JsonValue::String(b.to_string()),
            other => other
                .render()
                .map_or(JsonValue::Null, |v| JsonValue::String(v.into_owned())),
        };
        bindings.insert(
            (index + 1).to_string(),
            json!({ "type": kind, "value": value }),
        );
    }

    JsonValue::Object(bindings)
}

async fn read_response(response: reqwest::Response) -> SyncResult<Submitted> {
    let status = response.status();
    let body: StatementResponse = response.json().await.unwrap_or_default();

    match status {
        StatusCode::OK => Ok(Submitted::Done(body)),
        StatusCode::ACCEPTED => match body.statement_handle {
            Some(handle) => Ok(Submitted::Running(handle)),
            None => bail!(
                ErrorKind::DestinationQueryFailed,
                "Column store accepted a statement without a handle"
            ),
        },
        status => Err(status_error(status, &body)),
    }
}

fn status_error(status: StatusCode, body: &StatementResponse) -> SyncError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::AuthenticationError,
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ErrorKind::DestinationConnectionFailed
        }
        _ => ErrorKind::DestinationQueryFailed,
    };

    sync_error!(
        kind,
        "Column store statement failed",
        format!("status {status}: {}", body.describe())
    )
}

/// Converts result rows to records, typing each cell by its column's declared type.
fn to_records(response: StatementResponse) -> Vec<Record> {
    let row_type = response
        .result_set_meta_data
        .map(|meta| meta.row_type)
        .unwrap_or_default();

    response
        .data
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&row_type)
                .map(|(cell, column)| (column.name.clone(), typed_cell(cell, column)))
                .collect()
        })
        .collect()
}

fn typed_cell(cell: Option<String>, column: &RowType) -> Value {
    let Some(cell) = cell else {
        return Value::Null;
    };

    let typed = match column.kind.as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => cell.parse().ok().map(Value::Int),
        "fixed" | "real" => cell.parse().ok().map(Value::Float),
        "boolean" => cell.parse().ok().map(Value::Bool),
        _ => None,
    };

    typed.unwrap_or(Value::Text(cell))
}
