//! Client for the FileMaker Data API.
//!
//! A session token is obtained with basic auth on first use and reused for every request.
//! Finds that match nothing come back as FileMaker error `401`, which is treated as an empty
//! page. An expired token (error `952`) triggers one re-login and retry.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use syncer_config::shared::SourceConfig;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::source::{PageRequest, SourceClient};
use crate::types::{Record, Value};
use crate::{bail, sync_error};

/// FileMaker message code for a successful request.
const CODE_OK: &str = "0";
/// FileMaker message code for a find without matches.
const CODE_NO_RECORDS: &str = "401";
/// FileMaker message code for an invalid or expired session token.
const CODE_INVALID_TOKEN: &str = "952";

#[derive(Debug, Deserialize)]
struct Message {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    response: JsonValue,
    #[serde(default)]
    messages: Vec<Message>,
}

impl Envelope {
    fn code(&self) -> &str {
        self.messages.first().map_or(CODE_OK, |m| m.code.as_str())
    }

    fn message(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("[{}] {}", m.code, m.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Deserialize)]
struct FoundRecord {
    #[serde(rename = "fieldData", default)]
    field_data: Map<String, JsonValue>,
    #[serde(rename = "recordId")]
    record_id: Option<JsonValue>,
}

/// Converts one found record into a [`Record`], carrying the internal record id along as
/// the `recordId` field.
fn to_record(found: FoundRecord) -> Record {
    let mut record = Record::from_json_object(&found.field_data);
    if let Some(record_id) = found.record_id {
        let record_id = match record_id {
            JsonValue::String(id) => Value::Text(id),
            other => Value::Text(other.to_string()),
        };
        record.insert("recordId", record_id);
    }

    record
}

/// [`SourceClient`] over the FileMaker Data API.
#[derive(Debug)]
pub struct FileMakerClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: SecretString,
    layout_suffix: String,
    token: Mutex<Option<String>>,
}

impl FileMakerClient {
    pub fn new(config: &SourceConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| {
                sync_error!(
                    ErrorKind::ConfigError,
                    "Failed to build the source HTTP client",
                    err
                )
            })?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/fmi/data/vLatest/databases/{}",
                config.host.trim_end_matches('/'),
                config.database
            ),
            username: config.username.clone(),
            password: config.password.clone(),
            layout_suffix: config.layout_suffix.clone(),
            token: Mutex::new(None),
        })
    }

    fn layout(&self, table: &str) -> String {
        format!("{table}{}", self.layout_suffix)
    }

    /// Opens a session and stores its token.
    pub async fn login(&self) -> SyncResult<String> {
        let response = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .header("Content-Type", "application/json")
            .body("{}")
            .send()
            .await?;

        let status = response.status();
        let envelope: Envelope = response.json().await?;
        if !status.is_success() || envelope.code() != CODE_OK {
            bail!(
                ErrorKind::AuthenticationError,
                "Source login failed",
                format!("status {status}: {}", envelope.message())
            );
        }

        let Some(token) = envelope.response.get("token").and_then(JsonValue::as_str) else {
            bail!(
                ErrorKind::AuthenticationError,
                "Source login returned no session token"
            );
        };

        info!(url = %self.base_url, "opened source session");
        *self.token.lock().await = Some(token.to_string());

        Ok(token.to_string())
    }

    async fn token(&self) -> SyncResult<String> {
        let cached = self.token.lock().await.clone();
        match cached {
            Some(token) => Ok(token),
            None => self.login().await,
        }
    }

    fn find_body(request: &PageRequest) -> JsonValue {
        let mut body = json!({
            "query": request.predicate.to_json(),
            "limit": request.limit.to_string(),
            // The Data API counts records from 1.
            "offset": (request.offset + 1).to_string(),
        });
        if let Some(sort) = &request.sort {
            body["sort"] = JsonValue::Array(vec![sort.to_json()]);
        }

        body
    }

    async fn find(&self, token: &str, request: &PageRequest) -> SyncResult<Envelope> {
        let layout = self.layout(&request.table);
        let response = self
            .client
            .post(format!("{}/layouts/{layout}/_find", self.base_url))
            .bearer_auth(token)
            .json(&Self::find_body(request))
            .send()
            .await?;

        response.json::<Envelope>().await.map_err(SyncError::from)
    }
}

#[async_trait]
impl SourceClient for FileMakerClient {
    fn name(&self) -> &'static str {
        "filemaker"
    }

    async fn fetch_page(&self, request: &PageRequest) -> SyncResult<Vec<Record>> {
        let token = self.token().await?;
        let mut envelope = self.find(&token, request).await?;

        if envelope.code() == CODE_INVALID_TOKEN {
            warn!("source session expired, logging in again");
            let token = self.login().await?;
            envelope = self.find(&token, request).await?;
        }

        match envelope.code() {
            CODE_OK => {}
            CODE_NO_RECORDS => {
                debug!(table = %request.table, offset = request.offset, "no records matched");
                return Ok(Vec::new());
            }
            _ => bail!(
                ErrorKind::SourceQueryFailed,
                "Source find request failed",
                format!("layout `{}`: {}", self.layout(&request.table), envelope.message())
            ),
        }

        let data = envelope
            .response
            .get("data")
            .cloned()
            .unwrap_or(JsonValue::Array(Vec::new()));
        let found: Vec<FoundRecord> = serde_json::from_value(data)?;

        debug!(
            table = %request.table,
            offset = request.offset,
            records = found.len(),
            "fetched source page"
        );

        Ok(found.into_iter().map(to_record).collect())
    }

    async fn close(&self) -> SyncResult<()> {
        let Some(token) = self.token.lock().await.take() else {
            return Ok(());
        };

        let response = self
            .client
            .delete(format!("{}/sessions/{token}", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "failed to close source session");
        }

        Ok(())
    }
}
