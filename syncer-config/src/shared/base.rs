use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range.
    #[error("`{field}` {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// Two table entries share a destination table name.
    #[error("table `{0}` is configured more than once")]
    DuplicateTable(String),
    /// Neither the row store nor the column store is configured.
    #[error("at least one of `row_store` and `column_store` must be configured")]
    NoDestination,
}

impl ValidationError {
    pub(crate) fn invalid(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::InvalidFieldValue {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}
