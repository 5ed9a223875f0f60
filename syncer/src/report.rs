//! End-of-run summary.

use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::destination::LoadCounts;
use crate::state::table::TableSyncPhase;
use crate::types::{DestinationKind, format_timestamp};

/// Outcome of one table on one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationReport {
    pub kind: DestinationKind,
    pub phase: TableSyncPhase,
    pub counts: LoadCounts,
    /// Checkpoint stored after the run, `None` when it was not advanced.
    pub checkpoint: Option<NaiveDateTime>,
    /// Time spent loading into this destination.
    pub elapsed: Duration,
}

impl DestinationReport {
    pub fn new(kind: DestinationKind) -> Self {
        Self {
            kind,
            phase: TableSyncPhase::NotStarted,
            counts: LoadCounts::default(),
            checkpoint: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.phase.is_failed()
    }
}

impl fmt::Display for DestinationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DestinationKind::RowStore => write!(
                f,
                "{}: unchanged={} inserted={} updated={}",
                self.kind, self.counts.unchanged, self.counts.inserted, self.counts.updated
            )?,
            DestinationKind::ColumnStore => {
                write!(f, "{}: affected={}", self.kind, self.counts.affected)?
            }
        }
        if self.counts.failed > 0 {
            write!(f, " failed={}", self.counts.failed)?;
        }
        if self.counts.duplicates > 0 {
            write!(f, " duplicates={}", self.counts.duplicates)?;
        }
        write!(f, " ({:.2}s)", self.elapsed.as_secs_f64())?;
        if let Some(checkpoint) = &self.checkpoint {
            write!(f, " checkpoint={}", format_timestamp(checkpoint))?;
        }
        if let TableSyncPhase::Failed(reason) = &self.phase {
            write!(f, " FAILED: {reason}")?;
        }

        Ok(())
    }
}

/// Outcome of one table across its destinations.
#[derive(Debug, Clone, PartialEq)]
pub struct TableReport {
    pub source_table: String,
    pub dest_table: String,
    /// Records read by the largest extraction pass. Passes overlap, so they are not summed.
    pub records_read: u64,
    /// Number of extraction passes. One when every destination shared the same search.
    pub extraction_passes: usize,
    pub elapsed: Duration,
    pub destinations: Vec<DestinationReport>,
}

impl TableReport {
    pub fn destination(&self, kind: DestinationKind) -> Option<&DestinationReport> {
        self.destinations.iter().find(|d| d.kind == kind)
    }

    pub fn is_failed(&self) -> bool {
        self.destinations.iter().any(DestinationReport::is_failed)
    }
}

/// Summary of a whole run, printed when the run ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub tables: Vec<TableReport>,
    pub elapsed: Duration,
    /// `true` when shutdown was requested before every table finished.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn table(&self, dest_table: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.dest_table == dest_table)
    }

    pub fn failed_tables(&self) -> impl Iterator<Item = &TableReport> {
        self.tables.iter().filter(|t| t.is_failed())
    }

    pub fn total_read(&self) -> u64 {
        self.tables.iter().map(|t| t.records_read).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sync summary")?;
        for table in &self.tables {
            writeln!(
                f,
                "  {} ({:.2}s)",
                table.dest_table,
                table.elapsed.as_secs_f64()
            )?;
            for destination in &table.destinations {
                writeln!(f, "    {destination}")?;
            }
        }

        writeln!(f, "Data lineage")?;
        for table in &self.tables {
            writeln!(
                f,
                "  {} -> {}:{}",
                table.source_table, table.dest_table, table.records_read
            )?;
        }

        write!(
            f,
            "Total: {} tables, {} records read in {:.2}s",
            self.tables.len(),
            self.total_read(),
            self.elapsed.as_secs_f64()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }

        Ok(())
    }
}
