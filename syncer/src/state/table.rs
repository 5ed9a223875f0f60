use std::fmt;

use crate::types::DestinationKind;

/// Phase of one table during a run.
///
/// Phases move forward only. Each destination of a table reaches its own terminal phase, so
/// a table can be [`TableSyncPhase::Done`] on one destination and
/// [`TableSyncPhase::Failed`] on the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSyncPhase {
    /// The table has not been looked at yet.
    NotStarted,
    /// Pages are being requested from the source.
    Extracting,
    /// A page is being delivered to this destination.
    Loading(DestinationKind),
    /// Every page was delivered and the checkpoint is being written.
    CheckpointAdvance,
    /// The audit entry was written.
    LogWritten,
    /// The table finished on this destination.
    Done,
    /// The table stopped on this destination. No checkpoint was written.
    Failed(String),
}

impl TableSyncPhase {
    pub fn as_type(&self) -> TableSyncPhaseType {
        match self {
            Self::NotStarted => TableSyncPhaseType::NotStarted,
            Self::Extracting => TableSyncPhaseType::Extracting,
            Self::Loading(_) => TableSyncPhaseType::Loading,
            Self::CheckpointAdvance => TableSyncPhaseType::CheckpointAdvance,
            Self::LogWritten => TableSyncPhaseType::LogWritten,
            Self::Done => TableSyncPhaseType::Done,
            Self::Failed(_) => TableSyncPhaseType::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.as_type().is_terminal()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for TableSyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading(kind) => write!(f, "loading({kind})"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
            other => write!(f, "{}", other.as_type()),
        }
    }
}

/// [`TableSyncPhase`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableSyncPhaseType {
    NotStarted,
    Extracting,
    Loading,
    CheckpointAdvance,
    LogWritten,
    Done,
    Failed,
}

impl TableSyncPhaseType {
    /// Returns `true` if a table in this phase is done processing on its destination.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_static_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Extracting => "extracting",
            Self::Loading => "loading",
            Self::CheckpointAdvance => "checkpoint_advance",
            Self::LogWritten => "log_written",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TableSyncPhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(TableSyncPhase::NotStarted.to_string(), "not_started");
        assert_eq!(
            TableSyncPhase::Loading(DestinationKind::ColumnStore).to_string(),
            "loading(column_store)"
        );
        assert_eq!(
            TableSyncPhase::Failed("boom".into()).to_string(),
            "failed(boom)"
        );
    }

    #[test]
    fn test_terminal_phases() {
        assert!(TableSyncPhase::Done.is_terminal());
        assert!(TableSyncPhase::Failed("x".into()).is_terminal());
        assert!(!TableSyncPhase::LogWritten.is_terminal());
        assert!(!TableSyncPhase::Loading(DestinationKind::RowStore).is_terminal());
    }
}
