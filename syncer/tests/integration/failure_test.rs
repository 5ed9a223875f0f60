use syncer::error::ErrorKind;
use syncer::orchestrator::RunOptions;
use syncer::state::table::{TableSyncPhase, TableSyncPhaseType};
use syncer::store::checkpoint::CheckpointStore;
use syncer::test_utils::table::{incremental_table, ts};
use syncer::types::DestinationKind;
use syncer_telemetry::tracing::init_test_tracing;

use crate::common::TestSync;

async fn two_tables(test: &TestSync) {
    test.set_invoices(
        "Invoices",
        &[(1, "2024-01-01 09:00:00"), (2, "2024-01-02 09:00:00")],
    )
    .await;
    test.set_invoices("Payments", &[(1, "2024-01-03 09:00:00")])
        .await;
}

fn descriptors() -> Vec<syncer::types::TableSyncDescriptor> {
    vec![
        incremental_table("Invoices", "invoices"),
        incremental_table("Payments", "payments"),
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_destination_does_not_affect_the_other_test() {
    init_test_tracing();
    let test = TestSync::new();
    two_tables(&test).await;
    test.row_store.loader.fail_table("invoices").await;

    let summary = test
        .orchestrator(descriptors(), 10, RunOptions::default())
        .run()
        .await
        .unwrap();

    let invoices = summary.table("invoices").unwrap();
    let row_store = invoices.destination(DestinationKind::RowStore).unwrap();
    assert_eq!(row_store.phase.as_type(), TableSyncPhaseType::Failed);
    assert_eq!(row_store.checkpoint, None);
    assert_eq!(
        invoices.destination(DestinationKind::ColumnStore).unwrap().phase,
        TableSyncPhase::Done
    );
    assert_eq!(summary.failed_tables().count(), 1);

    // No checkpoint for the failed pair, later tables continue normally.
    let row_checkpoints = test.row_store.checkpoints.checkpoints().await;
    assert!(!row_checkpoints.contains_key("invoices"));
    assert_eq!(row_checkpoints.get("payments"), Some(&ts("2024-01-03 09:00:00")));
    assert_eq!(
        test.column_store
            .checkpoints
            .get_checkpoint("invoices")
            .await
            .unwrap(),
        Some(ts("2024-01-02 09:00:00"))
    );
    assert_eq!(test.column_store.loader.table_rows("invoices").await.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_destination_retries_from_the_old_checkpoint_test() {
    init_test_tracing();
    let test = TestSync::new();
    two_tables(&test).await;
    test.row_store.loader.fail_table("invoices").await;

    test.orchestrator(descriptors(), 10, RunOptions::default())
        .run()
        .await
        .unwrap();

    // A fresh loader stands in for the recovered destination.
    let recovered = TestSync {
        row_store: crate::common::TestDestination {
            loader: syncer::destination::memory::MemoryLoader::row_store(),
            checkpoints: test.row_store.checkpoints.clone(),
        },
        source: test.source.clone(),
        column_store: test.column_store.clone(),
        shutdown_tx: test.shutdown_tx.clone(),
    };
    let summary = recovered
        .orchestrator(descriptors(), 10, RunOptions::default())
        .run()
        .await
        .unwrap();

    let invoices = summary.table("invoices").unwrap();
    assert_eq!(invoices.extraction_passes, 2);
    assert_eq!(
        invoices
            .destination(DestinationKind::RowStore)
            .unwrap()
            .counts
            .inserted,
        2
    );
    assert_eq!(
        invoices
            .destination(DestinationKind::ColumnStore)
            .unwrap()
            .counts
            .input,
        0
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn setup_fatal_source_error_aborts_the_run_test() {
    init_test_tracing();
    let test = TestSync::new();
    two_tables(&test).await;
    test.source
        .fail_next_fetch(ErrorKind::SourceConnectionFailed)
        .await;

    let err = test
        .orchestrator(descriptors(), 10, RunOptions::default())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
    assert!(test.row_store.loader.table_rows("invoices").await.is_empty());
    assert!(test.row_store.checkpoints.checkpoints().await.is_empty());
    assert_eq!(test.source.requests().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_loss_after_an_empty_table_fails_only_that_table_test() {
    init_test_tracing();
    let test = TestSync::new();
    // Invoices has nothing new, so its only page comes back empty.
    test.set_invoices("Payments", &[(1, "2024-01-03 09:00:00")])
        .await;
    test.set_invoices("Refunds", &[(1, "2024-01-04 09:00:00")])
        .await;
    test.source
        .fail_table("Payments", ErrorKind::SourceConnectionFailed)
        .await;
    let descriptors = vec![
        incremental_table("Invoices", "invoices"),
        incremental_table("Payments", "payments"),
        incremental_table("Refunds", "refunds"),
    ];

    let summary = test
        .orchestrator(descriptors, 10, RunOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.tables.len(), 3);
    assert!(!summary.table("invoices").unwrap().is_failed());
    let payments = summary.table("payments").unwrap();
    for destination in &payments.destinations {
        assert_eq!(destination.phase.as_type(), TableSyncPhaseType::Failed);
    }
    assert!(!summary.table("refunds").unwrap().is_failed());
    assert_eq!(test.row_store.loader.table_rows("refunds").await.len(), 1);
    assert_eq!(
        test.row_store.checkpoints.get_checkpoint("refunds").await.unwrap(),
        Some(ts("2024-01-04 09:00:00"))
    );
    assert!(
        !test
            .row_store
            .checkpoints
            .checkpoints()
            .await
            .contains_key("payments")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_range_days_old_aborts_the_run_test() {
    init_test_tracing();
    let test = TestSync::new();
    two_tables(&test).await;

    let options = RunOptions {
        days_old: Some(200_000_000),
        ..RunOptions::default()
    };
    let err = test
        .orchestrator(descriptors(), 10, options)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert!(test.source.requests().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn query_error_fails_only_its_table_test() {
    init_test_tracing();
    let test = TestSync::new();
    two_tables(&test).await;
    test.source
        .fail_next_fetch(ErrorKind::SourceQueryFailed)
        .await;

    let summary = test
        .orchestrator(descriptors(), 10, RunOptions::default())
        .run()
        .await
        .unwrap();

    let invoices = summary.table("invoices").unwrap();
    for destination in &invoices.destinations {
        assert_eq!(destination.phase.as_type(), TableSyncPhaseType::Failed);
    }
    assert!(!summary.table("payments").unwrap().is_failed());
    assert!(test.row_store.loader.table_rows("invoices").await.is_empty());
    assert_eq!(test.row_store.loader.table_rows("payments").await.len(), 1);
    assert!(
        !test
            .row_store
            .checkpoints
            .checkpoints()
            .await
            .contains_key("invoices")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_finishes_the_page_in_flight_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.set_invoices(
        "Invoices",
        &[
            (1, "2024-01-01 09:00:00"),
            (2, "2024-01-02 09:00:00"),
            (3, "2024-01-03 09:00:00"),
            (4, "2024-01-04 09:00:00"),
            (5, "2024-01-05 09:00:00"),
        ],
    )
    .await;
    test.set_invoices("Payments", &[(1, "2024-01-03 09:00:00")])
        .await;
    test.source
        .shutdown_after(1, test.shutdown_tx.clone())
        .await;

    let summary = test
        .orchestrator(descriptors(), 2, RunOptions::default())
        .run()
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.tables.len(), 1);
    assert_eq!(test.source.requests().await.len(), 1);

    // The first page was loaded, so its last timestamp is committed.
    for destination in [&test.row_store, &test.column_store] {
        assert_eq!(destination.loader.table_rows("invoices").await.len(), 2);
        assert_eq!(
            destination
                .checkpoints
                .get_checkpoint("invoices")
                .await
                .unwrap(),
            Some(ts("2024-01-02 09:00:00"))
        );
    }
    assert!(test.source.requests_for("Payments").await.is_empty());
}
