use std::sync::Arc;

use syncer::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use syncer::destination::memory::MemoryLoader;
use syncer::orchestrator::{RunOptions, SyncContext, SyncDestination, SyncOrchestrator};
use syncer::record;
use syncer::search::SearchBuilder;
use syncer::store::checkpoint::MemoryCheckpointStore;
use syncer::test_utils::source::MemorySource;
use syncer::test_utils::table::{context, fixed_now, search_builder, source_ts};
use syncer::types::{Record, TableSyncDescriptor};

/// An invoice as the source stores it, modified at the canonical timestamp `modified`.
pub fn invoice(id: i64, modified: &str) -> Record {
    record! {
        "id" => id,
        "amount" => 10.5f64,
        "modificationHostTimestamp" => source_ts(modified),
    }
}

/// A memory loader together with the checkpoints of its destination.
#[derive(Debug, Clone)]
pub struct TestDestination {
    pub loader: MemoryLoader,
    pub checkpoints: MemoryCheckpointStore,
}

impl TestDestination {
    fn new(loader: MemoryLoader) -> Self {
        Self {
            loader,
            checkpoints: MemoryCheckpointStore::new(),
        }
    }

    fn sync_destination(&self) -> SyncDestination {
        SyncDestination::new(self.loader.clone(), Arc::new(self.checkpoints.clone()))
    }
}

/// Source, both destinations and the shutdown signal of one test.
#[derive(Debug)]
pub struct TestSync {
    pub source: MemorySource,
    pub row_store: TestDestination,
    pub column_store: TestDestination,
    pub shutdown_tx: ShutdownTx,
}

impl TestSync {
    pub fn new() -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            source: MemorySource::new(),
            row_store: TestDestination::new(MemoryLoader::row_store()),
            column_store: TestDestination::new(MemoryLoader::column_store()),
            shutdown_tx,
        }
    }

    /// Builds an orchestrator over both destinations with a fixed clock.
    ///
    /// Every call shares the same source, tables and checkpoints, so consecutive calls behave
    /// like consecutive runs.
    pub fn orchestrator(
        &self,
        descriptors: Vec<TableSyncDescriptor>,
        page_size: usize,
        options: RunOptions,
    ) -> SyncOrchestrator<MemorySource> {
        self.orchestrator_with_context(descriptors, context(page_size, options))
    }

    /// Like [`TestSync::orchestrator`], with searches limited to windows of `window_days`.
    pub fn windowed_orchestrator(
        &self,
        descriptors: Vec<TableSyncDescriptor>,
        page_size: usize,
        window_days: u32,
    ) -> SyncOrchestrator<MemorySource> {
        let mut context = context(page_size, RunOptions::default());
        let mut options = search_builder().options().clone();
        options.window_days = Some(window_days);
        context.search = SearchBuilder::new(options);

        self.orchestrator_with_context(descriptors, context)
    }

    fn orchestrator_with_context(
        &self,
        descriptors: Vec<TableSyncDescriptor>,
        context: SyncContext,
    ) -> SyncOrchestrator<MemorySource> {
        SyncOrchestrator::new(
            self.source.clone(),
            descriptors,
            context,
            self.shutdown_tx.subscribe(),
        )
        .with_destination(self.row_store.sync_destination())
        .with_destination(self.column_store.sync_destination())
        .with_clock(fixed_now)
    }

    pub async fn set_invoices(&self, table: &str, invoices: &[(i64, &str)]) {
        let records = invoices
            .iter()
            .map(|(id, modified)| invoice(*id, modified))
            .collect();
        self.source.set_records(table, records).await;
    }
}
