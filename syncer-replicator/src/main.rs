//! Sync binary.
//!
//! Parses the command line, loads the configuration, installs tracing and runs the selected
//! command on a multi-threaded runtime. The end-of-run summary is printed to stdout.

use std::process::ExitCode;

use clap::Parser;
use syncer_telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::cli::Args;
use crate::config::load_sync_config;
use crate::core::start_with_config;

mod cli;
mod config;
mod core;

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config = load_sync_config(args.local_testing)?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"), &args.logging_options())?;

    let summary = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let result = start_with_config(config, &args).await;
            if let Err(err) = &result {
                error!("{err:#}");
            }
            result
        })?;

    let Some(summary) = summary else {
        return Ok(ExitCode::SUCCESS);
    };

    println!("{summary}");

    let failed = summary.failed_tables().count();
    if failed > 0 {
        error!(failed, "sync finished with failed tables");
        return Ok(ExitCode::FAILURE);
    }

    info!(tables = summary.tables.len(), "sync finished");

    Ok(ExitCode::SUCCESS)
}
