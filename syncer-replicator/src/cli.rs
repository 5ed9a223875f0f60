use clap::{Parser, Subcommand};
use syncer::orchestrator::RunOptions;
use syncer::types::DestinationKind;
use syncer_telemetry::tracing::LoggingOptions;

/// Incremental sync from FileMaker into the row store and the column store.
#[derive(Parser, Debug)]
#[command(name = "syncer-replicator")]
#[command(about = "Syncs FileMaker tables into MySQL and Snowflake")]
pub struct Args {
    /// Only sync these destination tables (comma-separated)
    #[arg(long, value_delimiter = ',', global = true)]
    pub tables: Vec<String>,

    /// Skip these destination tables (comma-separated)
    #[arg(long, value_delimiter = ',', global = true)]
    pub ignore: Vec<String>,

    /// Sync records modified in the last N days instead of since the checkpoint
    #[arg(long, global = true)]
    pub days_old: Option<u32>,

    /// Destinations to load into (`rds`, `snowflake`), all configured ones by default
    #[arg(long, value_delimiter = ',', global = true)]
    pub target: Vec<DestinationKind>,

    /// Log at debug level
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log at trace level, including every SQL statement
    #[arg(long, global = true)]
    pub debug_logging: bool,

    /// Disable the log file and audit log writes
    #[arg(long, global = true)]
    pub logging_off: bool,

    /// Load the `local` configuration regardless of `APP_ENVIRONMENT`
    #[arg(long, global = true)]
    pub local_testing: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the sync (default)
    Sync,
    /// Rename each destination's checkpoint table out of the way
    ArchiveCheckpoints,
    /// Remove every stored checkpoint
    ResetCheckpoints,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Sync)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            tables: self.tables.clone(),
            ignore: self.ignore.clone(),
            days_old: self.days_old,
        }
    }

    pub fn logging_options(&self) -> LoggingOptions {
        LoggingOptions::from_flags(self.verbose, self.debug_logging, self.logging_off)
    }

    /// Returns `true` when `kind` should be loaded. No `--target` means every destination.
    pub fn targets(&self, kind: DestinationKind) -> bool {
        self.target.is_empty() || self.target.contains(&kind)
    }
}
