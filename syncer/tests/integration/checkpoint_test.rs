use syncer::orchestrator::RunOptions;
use syncer::store::checkpoint::CheckpointStore;
use syncer::test_utils::table::{incremental_table, source_ts, ts};
use syncer::types::{DestinationKind, TableSyncDescriptor, Value};
use syncer_telemetry::tracing::init_test_tracing;

use crate::common::TestSync;

fn day_subtracted_table() -> TableSyncDescriptor {
    TableSyncDescriptor {
        requires_day_subtraction: true,
        ..incremental_table("Invoices", "invoices")
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_moves_to_latest_loaded_timestamp_test() {
    init_test_tracing();
    let test = TestSync::new();
    // Pages come back sorted, so the order here does not matter.
    test.set_invoices(
        "Invoices",
        &[
            (3, "2024-02-01 08:30:00"),
            (1, "2024-01-01 09:00:00"),
            (2, "2024-01-15 17:45:00"),
        ],
    )
    .await;

    let summary = test
        .orchestrator(
            vec![incremental_table("Invoices", "invoices")],
            2,
            RunOptions::default(),
        )
        .run()
        .await
        .unwrap();

    let report = summary.table("invoices").unwrap();
    for (kind, destination) in [
        (DestinationKind::RowStore, &test.row_store),
        (DestinationKind::ColumnStore, &test.column_store),
    ] {
        assert_eq!(
            report.destination(kind).unwrap().checkpoint,
            Some(ts("2024-02-01 08:30:00"))
        );
        assert_eq!(
            destination.checkpoints.get_checkpoint("invoices").await.unwrap(),
            Some(ts("2024-02-01 08:30:00"))
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_never_moves_backwards_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.row_store
        .checkpoints
        .store_checkpoint("invoices", ts("2024-01-10 12:00:00"))
        .await
        .unwrap();
    test.set_invoices(
        "Invoices",
        &[(1, "2024-01-09 10:00:00"), (2, "2024-01-10 08:00:00")],
    )
    .await;

    let summary = test
        .orchestrator(vec![day_subtracted_table()], 10, RunOptions::default())
        .run()
        .await
        .unwrap();

    // The row store re-reads the trailing day and ends below its stored checkpoint.
    let report = summary.table("invoices").unwrap();
    assert_eq!(
        report.destination(DestinationKind::RowStore).unwrap().checkpoint,
        Some(ts("2024-01-10 12:00:00"))
    );
    assert_eq!(
        test.row_store.checkpoints.get_checkpoint("invoices").await.unwrap(),
        Some(ts("2024-01-10 12:00:00"))
    );
    assert_eq!(test.row_store.checkpoints.writes().await.len(), 1);

    assert_eq!(
        test.column_store.checkpoints.get_checkpoint("invoices").await.unwrap(),
        Some(ts("2024-01-10 08:00:00"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn destinations_with_different_checkpoints_extract_separately_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.row_store
        .checkpoints
        .store_checkpoint("invoices", ts("2024-01-10 12:00:00"))
        .await
        .unwrap();
    test.set_invoices(
        "Invoices",
        &[(1, "2024-01-05 10:00:00"), (2, "2024-01-11 08:00:00")],
    )
    .await;

    let summary = test
        .orchestrator(
            vec![incremental_table("Invoices", "invoices")],
            10,
            RunOptions::default(),
        )
        .run()
        .await
        .unwrap();

    let report = summary.table("invoices").unwrap();
    assert_eq!(report.extraction_passes, 2);
    // The column store pass reads both records, the row store pass reads one of them.
    assert_eq!(report.records_read, 2);

    let requests = test.source.requests_for("Invoices").await;
    let criteria: Vec<&str> = requests
        .iter()
        .map(|r| r.predicate.groups()[0].criteria[0].value.as_str())
        .collect();
    assert_eq!(
        criteria,
        vec![
            format!(">{}", source_ts("2024-01-10 12:00:00")),
            format!(">{}", source_ts("2000-01-01 00:00:00")),
        ]
    );

    assert_eq!(test.row_store.loader.table_rows("invoices").await.len(), 1);
    assert_eq!(test.column_store.loader.table_rows("invoices").await.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn destinations_without_checkpoints_share_one_extraction_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.set_invoices(
        "Invoices",
        &[(1, "2024-01-05 10:00:00"), (2, "2024-01-11 08:00:00")],
    )
    .await;

    let summary = test
        .orchestrator(
            vec![incremental_table("Invoices", "invoices")],
            10,
            RunOptions::default(),
        )
        .run()
        .await
        .unwrap();

    assert_eq!(summary.table("invoices").unwrap().extraction_passes, 1);
    assert_eq!(test.source.requests_for("Invoices").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn days_old_run_leaves_checkpoints_untouched_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.row_store
        .checkpoints
        .store_checkpoint("invoices", ts("2024-05-31 00:00:00"))
        .await
        .unwrap();
    test.set_invoices(
        "Invoices",
        &[(1, "2024-05-20 10:00:00"), (2, "2024-05-30 08:00:00")],
    )
    .await;

    let options = RunOptions {
        days_old: Some(7),
        ..RunOptions::default()
    };
    let summary = test
        .orchestrator(vec![incremental_table("Invoices", "invoices")], 10, options)
        .run()
        .await
        .unwrap();

    // The clock reads 2024-06-01, so the window starts at midnight on 2024-05-25.
    let requests = test.source.requests_for("Invoices").await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].predicate.groups()[0].criteria[0].value,
        format!(">={}", source_ts("2024-05-25 00:00:00"))
    );
    assert_eq!(summary.table("invoices").unwrap().records_read, 1);

    assert_eq!(test.row_store.checkpoints.writes().await.len(), 1);
    assert_eq!(
        test.row_store.checkpoints.get_checkpoint("invoices").await.unwrap(),
        Some(ts("2024-05-31 00:00:00"))
    );
    assert!(test.column_store.checkpoints.checkpoints().await.is_empty());

    let audit = test.column_store.loader.appended_rows("etl_log").await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].get("date_modified"), Some(&Value::Null));
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_windows_still_advance_the_checkpoint_test() {
    init_test_tracing();
    let test = TestSync::new();
    for destination in [&test.row_store, &test.column_store] {
        destination
            .checkpoints
            .store_checkpoint("invoices", ts("2024-01-01 00:00:00"))
            .await
            .unwrap();
    }
    test.set_invoices("Invoices", &[(1, "2024-03-15 09:00:00")])
        .await;
    let descriptors = vec![incremental_table("Invoices", "invoices")];

    let mut checkpoints = Vec::new();
    for _ in 0..3 {
        let summary = test
            .windowed_orchestrator(descriptors.clone(), 10, 30)
            .run()
            .await
            .unwrap();
        assert!(!summary.table("invoices").unwrap().is_failed());
        checkpoints.push(
            test.row_store
                .checkpoints
                .get_checkpoint("invoices")
                .await
                .unwrap(),
        );
    }

    assert_eq!(
        checkpoints,
        vec![
            Some(ts("2024-01-31 00:00:00")),
            Some(ts("2024-03-01 00:00:00")),
            Some(ts("2024-03-31 00:00:00")),
        ]
    );
    let criteria: Vec<String> = test
        .source
        .requests_for("Invoices")
        .await
        .iter()
        .map(|r| r.predicate.groups()[0].criteria[0].value.clone())
        .collect();
    assert_eq!(
        criteria[0],
        format!(
            "{}...{}",
            source_ts("2024-01-01 00:00:00"),
            source_ts("2024-01-31 00:00:00")
        )
    );
    assert_eq!(
        test.column_store.checkpoints.get_checkpoint("invoices").await.unwrap(),
        Some(ts("2024-03-31 00:00:00"))
    );
    assert_eq!(test.row_store.loader.table_rows("invoices").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_window_keeps_the_loaded_checkpoint_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.row_store
        .checkpoints
        .store_checkpoint("invoices", ts("2024-01-01 00:00:00"))
        .await
        .unwrap();
    test.column_store
        .checkpoints
        .store_checkpoint("invoices", ts("2024-01-01 00:00:00"))
        .await
        .unwrap();
    test.set_invoices(
        "Invoices",
        &[
            (1, "2024-01-05 09:00:00"),
            (2, "2024-01-06 09:00:00"),
            (3, "2024-01-07 09:00:00"),
        ],
    )
    .await;
    test.source
        .shutdown_after(1, test.shutdown_tx.clone())
        .await;

    let summary = test
        .windowed_orchestrator(vec![incremental_table("Invoices", "invoices")], 2, 30)
        .run()
        .await
        .unwrap();

    // Only the first page was read, so the window end is not reached.
    assert!(summary.cancelled);
    assert_eq!(
        test.row_store.checkpoints.get_checkpoint("invoices").await.unwrap(),
        Some(ts("2024-01-06 09:00:00"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn archive_and_reset_clear_checkpoints_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.row_store
        .checkpoints
        .store_checkpoint("invoices", ts("2024-01-10 12:00:00"))
        .await
        .unwrap();
    test.column_store
        .checkpoints
        .store_checkpoint("invoices", ts("2024-01-10 12:00:00"))
        .await
        .unwrap();
    let orchestrator = test.orchestrator(
        vec![incremental_table("Invoices", "invoices")],
        10,
        RunOptions::default(),
    );

    let archived = orchestrator.archive_checkpoints().await.unwrap();
    assert_eq!(
        archived,
        vec![
            (
                DestinationKind::RowStore,
                Some("sync_status_1717243200".to_string())
            ),
            (
                DestinationKind::ColumnStore,
                Some("sync_status_1717243200".to_string())
            ),
        ]
    );
    assert!(test.row_store.checkpoints.checkpoints().await.is_empty());
    assert_eq!(test.row_store.checkpoints.archives().await.len(), 1);

    test.column_store
        .checkpoints
        .store_checkpoint("payments", ts("2024-01-10 12:00:00"))
        .await
        .unwrap();
    orchestrator.reset_checkpoints().await.unwrap();
    assert!(test.column_store.checkpoints.checkpoints().await.is_empty());
}
