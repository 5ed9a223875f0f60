use std::sync::Arc;

use anyhow::bail;
use syncer::audit::AuditLogger;
use syncer::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use syncer::destination::{ColumnStoreLoader, RowStoreLoader, SqlExecutor};
use syncer::orchestrator::{SyncContext, SyncDestination, SyncOrchestrator};
use syncer::report::RunSummary;
use syncer::schema::{Dialect, MySqlDialect, SnowflakeDialect};
use syncer::search::{SearchBuilder, SearchOptions};
use syncer::source::FileMakerClient;
use syncer::store::checkpoint::SqlCheckpointStore;
use syncer::types::{DestinationKind, TableSyncDescriptor};
use syncer_config::shared::{
    AuditConfig, BatchConfig, CheckpointConfig, StagingTableKind, SyncConfig,
};
use syncer_destinations::mysql::MySqlExecutor;
use syncer_destinations::snowflake::SnowflakeExecutor;
use tracing::{debug, error, info, warn};

use crate::cli::{Args, Command};

/// Wires the source and the selected destinations, then runs `args.command()`.
///
/// Returns the run summary for `sync`, `None` for the checkpoint maintenance commands.
pub async fn start_with_config(
    config: SyncConfig,
    args: &Args,
) -> anyhow::Result<Option<RunSummary>> {
    info!(command = ?args.command(), "starting syncer");

    log_config(&config);

    let descriptors = config
        .tables
        .iter()
        .map(TableSyncDescriptor::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let source = FileMakerClient::new(&config.source)?;
    let context = SyncContext {
        search: SearchBuilder::new(SearchOptions::from_config(&config.search)?),
        default_page_size: config.batch.page_size,
        audit: audit_logger(&config.audit, args.logging_off),
        options: args.run_options(),
    };

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let mut orchestrator = SyncOrchestrator::new(source, descriptors, context, shutdown_rx);

    for destination in connect_destinations(&config, args).await? {
        orchestrator = orchestrator.with_destination(destination);
    }
    if orchestrator.destination_kinds().is_empty() {
        bail!("no destination is configured for the selected targets");
    }

    let result = run_command(&mut orchestrator, args.command(), shutdown_tx).await;

    if let Err(err) = orchestrator.shutdown().await {
        warn!(error = %err, "failed to close connections cleanly");
    }

    result
}

async fn run_command(
    orchestrator: &mut SyncOrchestrator<FileMakerClient>,
    command: Command,
    shutdown_tx: ShutdownTx,
) -> anyhow::Result<Option<RunSummary>> {
    match command {
        Command::Sync => Ok(Some(run_sync(orchestrator, shutdown_tx).await?)),
        Command::ArchiveCheckpoints => {
            let archived = orchestrator.archive_checkpoints().await?;
            if archived.iter().all(|(_, name)| name.is_none()) {
                warn!("no destination had checkpoints to archive");
            }
            Ok(None)
        }
        Command::ResetCheckpoints => {
            orchestrator.reset_checkpoints().await?;
            Ok(None)
        }
    }
}

async fn run_sync(
    orchestrator: &mut SyncOrchestrator<FileMakerClient>,
    shutdown_tx: ShutdownTx,
) -> anyhow::Result<RunSummary> {
    let shutdown_handle = tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown requested, finishing the current page");
        shutdown_tx.shutdown();
    });

    let result = orchestrator.run().await;

    // The listener only matters while the run is in progress.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    let summary = result?;
    for table in summary.failed_tables() {
        error!(table = %table.dest_table, "table failed on at least one destination");
    }

    Ok(summary)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => debug!("sigint received"),
                _ = sigterm.recv() => debug!("sigterm received"),
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to register the sigterm handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn audit_logger(config: &AuditConfig, logging_off: bool) -> AuditLogger {
    if logging_off || !config.enabled {
        info!("audit log disabled");
        return AuditLogger::disabled();
    }

    AuditLogger::new(&config.table, &config.primary_key)
}

/// Connects every configured destination selected by `--target`.
///
/// A failed connection ends the run before any table is read.
async fn connect_destinations(
    config: &SyncConfig,
    args: &Args,
) -> anyhow::Result<Vec<SyncDestination>> {
    let mut destinations = Vec::new();

    if args.targets(DestinationKind::RowStore) {
        match &config.row_store {
            Some(row_store) => {
                let executor: Arc<dyn SqlExecutor> =
                    Arc::new(MySqlExecutor::connect(row_store).await?);
                let checkpoints =
                    checkpoint_store(Arc::new(MySqlDialect), &executor, &config.checkpoint);
                destinations.push(SyncDestination::new(
                    RowStoreLoader::new(executor),
                    checkpoints,
                ));
            }
            None => warn!("row store selected but not configured, skipping it"),
        }
    }

    if args.targets(DestinationKind::ColumnStore) {
        match &config.column_store {
            Some(column_store) => {
                let executor: Arc<dyn SqlExecutor> =
                    Arc::new(SnowflakeExecutor::new(column_store)?);
                let checkpoints =
                    checkpoint_store(Arc::new(SnowflakeDialect), &executor, &config.checkpoint);
                let loader =
                    column_store_loader(executor, column_store.staging_table_kind, &config.batch);
                destinations.push(SyncDestination::new(loader, checkpoints));
            }
            None => warn!("column store selected but not configured, skipping it"),
        }
    }

    Ok(destinations)
}

fn checkpoint_store(
    dialect: Arc<dyn Dialect>,
    executor: &Arc<dyn SqlExecutor>,
    config: &CheckpointConfig,
) -> Arc<SqlCheckpointStore> {
    Arc::new(SqlCheckpointStore::new(dialect, Arc::clone(executor), &config.table))
}

fn column_store_loader(
    executor: Arc<dyn SqlExecutor>,
    staging_kind: StagingTableKind,
    batch: &BatchConfig,
) -> ColumnStoreLoader {
    ColumnStoreLoader::new(executor)
        .with_staging_kind(staging_kind)
        .with_insert_chunk_size(batch.insert_chunk_size)
}

fn log_config(config: &SyncConfig) {
    debug!(
        host = %config.source.host,
        database = %config.source.database,
        "using source config"
    );
    if let Some(row_store) = &config.row_store {
        debug!(
            host = %row_store.host,
            port = row_store.port,
            database = %row_store.database,
            "using row store config"
        );
    }
    if let Some(column_store) = &config.column_store {
        debug!(
            account = %column_store.account,
            database = %column_store.database,
            schema = %column_store.schema,
            staging_table_kind = ?column_store.staging_table_kind,
            "using column store config"
        );
    }
    debug!(
        tables = config.tables.len(),
        page_size = config.batch.page_size,
        insert_chunk_size = config.batch.insert_chunk_size,
        "using batch config"
    );
}
