//! Per-record transforms applied between extraction and loading.

mod codes;
mod field;

pub use codes::extract_procedure_codes;
pub use field::{FieldMapper, normalize_date};
