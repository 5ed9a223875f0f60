use std::sync::LazyLock;

use regex::Regex;

use crate::types::{CodeExtraction, Record, Value};

/// Procedure codes: one uppercase letter followed by exactly four digits, as a whole word.
static PROCEDURE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][0-9]{4}\b").expect("valid procedure code regex"));

/// Extracts procedure codes from free text, comma-joined in order of appearance.
///
/// Repeated codes are kept.
pub fn extract_procedure_codes(text: &str) -> String {
    PROCEDURE_CODE_RE
        .find_iter(text)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

impl CodeExtraction {
    /// Attaches the extracted codes to `record`. Records without the text field get an empty
    /// value so every record of a batch keeps the same field set.
    pub fn apply(&self, record: &mut Record) {
        let codes = record
            .get(&self.source_field)
            .and_then(Value::as_str)
            .map(extract_procedure_codes)
            .unwrap_or_default();

        record.insert(self.target_field.clone(), Value::Text(codes));
    }
}
