//! Append-only audit trail of sync runs.
//!
//! One row is written per table and destination whenever a run processed records for it.

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::destination::{LoadCounts, Loader};
use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::{DestinationKind, LoadTarget, Record, Value, format_timestamp};

/// Default audit table name.
pub const DEFAULT_AUDIT_TABLE: &str = "etl_log";

/// Default identity column of the audit table.
pub const DEFAULT_AUDIT_PRIMARY_KEY: &str = "id";

/// Summary of one table's run against one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    pub data_table: String,
    pub destination: DestinationKind,
    pub counts: LoadCounts,
    /// Checkpoint stored after the run.
    pub date_modified: Option<NaiveDateTime>,
    /// Wall-clock time the entry was written.
    pub date_time: NaiveDateTime,
    /// Seconds spent on the table.
    pub timelapse: f64,
    pub error_message: Option<String>,
}

impl AuditLogEntry {
    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }

    /// Renders the entry as an audit table row.
    ///
    /// Row stores get the inserted, updated and unchanged buckets. Column stores cannot tell
    /// updated rows from matched ones, so they only get `affected_rows`.
    pub fn to_record(&self) -> Record {
        let mut record = Record::with_capacity(9);
        record.insert("data_table", self.data_table.as_str());

        match self.destination {
            DestinationKind::RowStore => {
                record.insert("records_added", count(self.counts.inserted));
                record.insert("records_updated", count(self.counts.updated));
                record.insert("records_unchanged", count(self.counts.unchanged));
            }
            DestinationKind::ColumnStore => {
                record.insert("affected_rows", count(self.counts.affected));
            }
        }

        record.insert(
            "date_modified",
            self.date_modified.as_ref().map(format_timestamp),
        );
        record.insert("date_time", format_timestamp(&self.date_time));
        record.insert("timelapse", self.timelapse);
        record.insert("error", self.has_error());
        record.insert(
            "error_message",
            self.error_message.clone().map_or(Value::Null, Value::Text),
        );

        record
    }
}

fn count(value: u64) -> Value {
    Value::Int(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Writes [`AuditLogEntry`] rows through a destination's append path.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    target: LoadTarget,
    enabled: bool,
}

impl AuditLogger {
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            target: LoadTarget::new(table, Some(primary_key)),
            enabled: true,
        }
    }

    /// A logger that drops every entry.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn table(&self) -> &str {
        &self.target.table
    }

    pub async fn write(&self, loader: &mut dyn Loader, entry: &AuditLogEntry) -> SyncResult<()> {
        if !self.enabled {
            debug!(table = %entry.data_table, "audit log disabled, skipping entry");
            return Ok(());
        }

        loader
            .append_rows(&self.target, &[entry.to_record()])
            .await
            .map_err(|err| {
                warn!(
                    table = %entry.data_table,
                    destination = %entry.destination,
                    error = %err,
                    "failed to write audit log entry"
                );
                sync_error!(
                    ErrorKind::AuditLogFailed,
                    "Failed to write audit log entry",
                    format!("table `{}` on {}: {err}", entry.data_table, entry.destination)
                )
            })?;

        Ok(())
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_TABLE, DEFAULT_AUDIT_PRIMARY_KEY)
    }
}
