use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::destination::executor::{AffectedRowsConvention, SqlExecutor, Statement};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::sync_error;
use crate::types::Record;

#[derive(Debug, Default)]
struct Script {
    queries: VecDeque<Result<Vec<Record>, String>>,
    executes: VecDeque<Result<u64, String>>,
    statements: Vec<Statement>,
}

/// [`SqlExecutor`] answering from pre-scripted results.
///
/// Queries and executes each pop the next scripted result in order. When nothing is scripted a
/// query returns no rows and an execute reports zero affected rows. Every statement is recorded.
#[derive(Debug)]
pub struct ScriptedExecutor {
    convention: AffectedRowsConvention,
    script: Mutex<Script>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            convention: AffectedRowsConvention::ChangedRows,
            script: Mutex::new(Script::default()),
        }
    }

    pub fn with_convention(mut self, convention: AffectedRowsConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn push_rows(&self, rows: Vec<Record>) {
        self.script().queries.push_back(Ok(rows));
    }

    pub fn fail_next_query(&self, message: &str) {
        self.script().queries.push_back(Err(message.to_string()));
    }

    pub fn push_affected(&self, affected: u64) {
        self.script().executes.push_back(Ok(affected));
    }

    pub fn fail_next_execute(&self, message: &str) {
        self.script().executes.push_back(Err(message.to_string()));
    }

    /// Every statement received so far, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.script().statements.clone()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn scripted_error(message: String) -> SyncError {
    sync_error!(
        ErrorKind::DestinationQueryFailed,
        "Scripted statement failure",
        detail = message
    )
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn affected_rows_convention(&self) -> AffectedRowsConvention {
        self.convention
    }

    async fn execute(&self, statement: &Statement) -> SyncResult<u64> {
        let mut script = self.script();
        script.statements.push(statement.clone());
        script
            .executes
            .pop_front()
            .unwrap_or(Ok(0))
            .map_err(scripted_error)
    }

    async fn query(&self, statement: &Statement) -> SyncResult<Vec<Record>> {
        let mut script = self.script();
        script.statements.push(statement.clone());
        script
            .queries
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
            .map_err(scripted_error)
    }
}
