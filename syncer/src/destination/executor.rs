use std::fmt;

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::types::{Record, Value};

/// A SQL statement with positional `?` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)?;
        if !self.params.is_empty() {
            write!(f, " -- {} params", self.params.len())?;
        }
        Ok(())
    }
}

/// How an executor reports affected rows for an insert-or-update statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffectedRowsConvention {
    /// Only changed rows are counted: 0 for an unchanged match, 1 for an insert, 2 for an
    /// update.
    ChangedRows,
    /// Matched rows are counted even when nothing changed, so an unchanged match reports 1
    /// and cannot be told apart from an insert by the count alone.
    FoundRows,
}

/// Executes SQL against one destination.
///
/// Implementations own their connection lifecycle and map driver failures to
/// [`crate::error::ErrorKind::DestinationQueryFailed`] or
/// [`crate::error::ErrorKind::DestinationConnectionFailed`].
#[async_trait]
pub trait SqlExecutor: Send + Sync + fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn affected_rows_convention(&self) -> AffectedRowsConvention {
        AffectedRowsConvention::ChangedRows
    }

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, statement: &Statement) -> SyncResult<u64>;

    /// Runs a statement and returns its rows keyed by column name.
    async fn query(&self, statement: &Statement) -> SyncResult<Vec<Record>>;

    async fn close(&self) -> SyncResult<()> {
        Ok(())
    }
}
