use std::collections::BTreeMap;

use crate::types::{
    CANONICAL_DATE_FORMAT, CANONICAL_TIMESTAMP_FORMAT, Record, Value, parse_timestamp,
};

/// Destination columns starting with this prefix hold dates and are normalized.
const DATE_COLUMN_PREFIX: &str = "date_";

/// Byte order mark occasionally present at the start of source text values.
const BYTE_ORDER_MARK: char = '\u{FEFF}';

/// Maps raw source records to destination-shaped records for one table.
///
/// Field names are renamed through the table's column map (unmapped names pass through),
/// text values are trimmed, and `date_*` columns are normalized to canonical formats.
#[derive(Debug, Clone)]
pub struct FieldMapper<'a> {
    column_map: &'a BTreeMap<String, String>,
}

impl<'a> FieldMapper<'a> {
    pub fn new(column_map: &'a BTreeMap<String, String>) -> Self {
        Self { column_map }
    }

    /// Returns the destination column name for a source field.
    pub fn column_name<'b>(&'b self, source_field: &'b str) -> &'b str {
        self.column_map
            .get(source_field)
            .map(String::as_str)
            .unwrap_or(source_field)
    }

    pub fn map_record(&self, raw: Record) -> Record {
        let mut mapped = Record::with_capacity(raw.len());

        for (field, value) in raw {
            let column = self.column_name(&field).to_string();
            let value = normalize_value(&column, value);
            mapped.insert(column, value);
        }

        mapped
    }

    pub fn map_batch(&self, raw: Vec<Record>) -> Vec<Record> {
        raw.into_iter().map(|record| self.map_record(record)).collect()
    }
}

fn normalize_value(column: &str, value: Value) -> Value {
    match value {
        Value::Text(text) => {
            let cleaned = clean_text(&text);
            if column.starts_with(DATE_COLUMN_PREFIX) {
                Value::Text(normalize_date(cleaned))
            } else {
                Value::Text(cleaned.to_string())
            }
        }
        other => other,
    }
}

fn clean_text(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c == BYTE_ORDER_MARK)
}

/// Normalizes a date-like string.
///
/// Values with a time part become `YYYY-MM-DD HH:MM:SS`, date-only values become `YYYY-MM-DD`.
/// Empty and unparsable values become an empty string.
pub fn normalize_date(value: &str) -> String {
    let Some(parsed) = parse_timestamp(value) else {
        return String::new();
    };

    if value.contains(':') {
        parsed.format(CANONICAL_TIMESTAMP_FORMAT).to_string()
    } else {
        parsed.format(CANONICAL_DATE_FORMAT).to_string()
    }
}
