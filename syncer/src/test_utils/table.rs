use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::audit::AuditLogger;
use crate::orchestrator::{RunOptions, SyncContext};
use crate::search::{
    SearchBuilder, SearchCriterion, SearchGroup, SearchOptions, SearchTemplate,
    WATERMARK_PLACEHOLDER,
};
use crate::types::{CANONICAL_TIMESTAMP_FORMAT, TableSyncDescriptor};

/// Timestamp format of the in-memory source, matching what the real source emits.
pub const SOURCE_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Parses a canonical `YYYY-MM-DD HH:MM:SS` timestamp.
pub fn ts(input: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(input, CANONICAL_TIMESTAMP_FORMAT)
        .unwrap_or_else(|err| panic!("invalid test timestamp `{input}`: {err}"))
}

/// Formats a timestamp the way the source stores it.
pub fn source_ts(input: &str) -> String {
    ts(input).format(SOURCE_TIMESTAMP_FORMAT).to_string()
}

/// Fixed clock used by orchestrator tests.
pub fn fixed_now() -> NaiveDateTime {
    ts("2024-06-01 12:00:00")
}

/// Descriptor of an incremental table keyed by `id` and filtered on
/// `modificationHostTimestamp`.
pub fn incremental_table(source_table: &str, dest_table: &str) -> TableSyncDescriptor {
    TableSyncDescriptor {
        source_table: source_table.to_string(),
        dest_table: dest_table.to_string(),
        search_template: SearchTemplate::new(vec![SearchGroup::new(vec![
            SearchCriterion::new("modificationHostTimestamp", WATERMARK_PLACEHOLDER),
        ])]),
        column_map: BTreeMap::new(),
        primary_key: Some("id".to_string()),
        requires_day_subtraction: false,
        page_size: None,
        timestamp_field: "modificationHostTimestamp".to_string(),
        code_extraction: None,
    }
}

/// Descriptor of a table reloaded in full on every run.
pub fn full_table(source_table: &str, dest_table: &str) -> TableSyncDescriptor {
    TableSyncDescriptor {
        search_template: SearchTemplate::new(vec![SearchGroup::new(vec![
            SearchCriterion::new("id", "*"),
        ])]),
        ..incremental_table(source_table, dest_table)
    }
}

pub fn search_builder() -> SearchBuilder {
    SearchBuilder::new(SearchOptions {
        timestamp_format: SOURCE_TIMESTAMP_FORMAT.to_string(),
        default_epoch: ts("2000-01-01 00:00:00"),
        window_days: None,
    })
}

/// Run context with the default audit table and the given page size.
pub fn context(page_size: usize, options: RunOptions) -> SyncContext {
    SyncContext {
        search: search_builder(),
        default_page_size: page_size,
        audit: AuditLogger::default(),
        options,
    }
}
