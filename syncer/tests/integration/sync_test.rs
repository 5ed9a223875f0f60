use syncer::orchestrator::RunOptions;
use syncer::record;
use syncer::source::SortOrder;
use syncer::state::table::TableSyncPhase;
use syncer::test_utils::table::{full_table, incremental_table, source_ts, ts};
use syncer::types::{CodeExtraction, DestinationKind, Value};
use syncer_telemetry::tracing::init_test_tracing;

use crate::common::{TestSync, invoice};

#[tokio::test(flavor = "multi_thread")]
async fn pages_until_a_short_page_test() {
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

    let mut orchestrator =
        test.orchestrator(vec![incremental_table("Invoices", "invoices")], 2, RunOptions::default());
    let summary = orchestrator.run().await.unwrap();

    let requests = test.source.requests_for("Invoices").await;
    let offsets: Vec<usize> = requests.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 2, 4]);
    assert!(requests.iter().all(|r| r.limit == 2));
    let sort = requests[0].sort.as_ref().unwrap();
    assert_eq!(sort.field, "modificationHostTimestamp");
    assert_eq!(sort.order, SortOrder::Ascend);

    let report = summary.table("invoices").unwrap();
    assert_eq!(report.records_read, 5);
    assert_eq!(report.extraction_passes, 1);
    assert_eq!(test.row_store.loader.table_rows("invoices").await.len(), 5);
    assert_eq!(test.column_store.loader.table_rows("invoices").await.len(), 5);
    assert_eq!(test.row_store.loader.batch_sizes("invoices").await, vec![2, 2, 1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn exact_multiple_of_page_size_ends_on_empty_page_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.set_invoices(
        "Invoices",
        &[
            (1, "2024-01-01 09:00:00"),
            (2, "2024-01-02 09:00:00"),
            (3, "2024-01-03 09:00:00"),
            (4, "2024-01-04 09:00:00"),
        ],
    )
    .await;

    let mut orchestrator =
        test.orchestrator(vec![incremental_table("Invoices", "invoices")], 2, RunOptions::default());
    orchestrator.run().await.unwrap();

    // Four records in pages of two take ceil((4 + 1) / 2) = 3 requests.
    assert_eq!(test.source.requests_for("Invoices").await.len(), 3);
    assert_eq!(test.row_store.loader.batch_sizes("invoices").await, vec![2, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rerun_without_changes_is_a_no_op_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.set_invoices(
        "Invoices",
        &[(1, "2024-01-01 09:00:00"), (2, "2024-01-03 09:00:00")],
    )
    .await;
    let descriptors = vec![incremental_table("Invoices", "invoices")];

    test.orchestrator(descriptors.clone(), 10, RunOptions::default())
        .run()
        .await
        .unwrap();
    let summary = test
        .orchestrator(descriptors, 10, RunOptions::default())
        .run()
        .await
        .unwrap();

    let report = summary.table("invoices").unwrap();
    assert_eq!(report.records_read, 0);
    for kind in [DestinationKind::RowStore, DestinationKind::ColumnStore] {
        let destination = report.destination(kind).unwrap();
        assert_eq!(destination.phase, TableSyncPhase::Done);
        assert_eq!(destination.counts.input, 0);
    }

    // The second run asks for records after the stored checkpoint and gets none.
    let requests = test.source.requests_for("Invoices").await;
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].predicate.groups()[0].criteria[0].value,
        format!(">{}", source_ts("2024-01-03 09:00:00"))
    );

    assert_eq!(test.row_store.checkpoints.writes().await.len(), 1);
    assert_eq!(test.row_store.loader.table_rows("invoices").await.len(), 2);
    assert_eq!(test.row_store.loader.appended_rows("etl_log").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn upserts_classify_inserted_updated_and_unchanged_rows_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.source
        .set_records(
            "Customers",
            vec![
                record! { "id" => 1i64, "name" => "Ada" },
                record! { "id" => 2i64, "name" => "Grace" },
                record! { "id" => 3i64, "name" => "Edsger" },
            ],
        )
        .await;
    let descriptors = vec![full_table("Customers", "customers")];

    let first = test
        .orchestrator(descriptors.clone(), 10, RunOptions::default())
        .run()
        .await
        .unwrap();
    let counts = first
        .table("customers")
        .unwrap()
        .destination(DestinationKind::RowStore)
        .unwrap()
        .counts;
    assert_eq!(counts.inserted, 3);

    test.source
        .set_records(
            "Customers",
            vec![
                record! { "id" => 1i64, "name" => "Ada" },
                record! { "id" => 2i64, "name" => "Grace Hopper" },
                record! { "id" => 3i64, "name" => "Edsger" },
                record! { "id" => 4i64, "name" => "Barbara" },
            ],
        )
        .await;
    let second = test
        .orchestrator(descriptors, 10, RunOptions::default())
        .run()
        .await
        .unwrap();

    let report = second.table("customers").unwrap();
    let row_store = report.destination(DestinationKind::RowStore).unwrap();
    assert_eq!(row_store.counts.inserted, 1);
    assert_eq!(row_store.counts.updated, 1);
    assert_eq!(row_store.counts.unchanged, 2);
    // Tables without the watermark placeholder never store a checkpoint.
    assert_eq!(row_store.checkpoint, None);

    let column_store = report.destination(DestinationKind::ColumnStore).unwrap();
    assert_eq!(column_store.counts.affected, 4);

    let row_audit = test.row_store.loader.appended_rows("etl_log").await;
    assert_eq!(row_audit.len(), 2);
    assert_eq!(row_audit[1].get("records_added"), Some(&Value::Int(1)));
    assert_eq!(row_audit[1].get("records_updated"), Some(&Value::Int(1)));
    assert_eq!(row_audit[1].get("records_unchanged"), Some(&Value::Int(2)));

    let column_audit = test.column_store.loader.appended_rows("etl_log").await;
    assert_eq!(column_audit[1].get("affected_rows"), Some(&Value::Int(4)));
    assert!(column_audit[1].get("records_added").is_none());

    let rows = test.row_store.loader.table_rows("customers").await;
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[1].get("name"), Some(&Value::Text("Grace Hopper".into())));
}

#[tokio::test(flavor = "multi_thread")]
async fn audit_entry_records_the_stored_checkpoint_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.set_invoices(
        "Invoices",
        &[(1, "2024-01-01 09:00:00"), (2, "2024-01-03 09:00:00")],
    )
    .await;

    test.orchestrator(
        vec![incremental_table("Invoices", "invoices")],
        10,
        RunOptions::default(),
    )
    .run()
    .await
    .unwrap();

    for destination in [&test.row_store, &test.column_store] {
        let audit = destination.loader.appended_rows("etl_log").await;
        assert_eq!(audit.len(), 1);
        let entry = &audit[0];
        assert_eq!(entry.get("data_table"), Some(&Value::Text("invoices".into())));
        assert_eq!(
            entry.get("date_modified"),
            Some(&Value::Text("2024-01-03 09:00:00".into()))
        );
        assert_eq!(
            entry.get("date_time"),
            Some(&Value::Text("2024-06-01 12:00:00".into()))
        );
        assert_eq!(entry.get("error"), Some(&Value::Bool(false)));
        assert_eq!(entry.get("error_message"), Some(&Value::Null));
    }

    assert_eq!(
        test.row_store.checkpoints.checkpoints().await.get("invoices"),
        Some(&ts("2024-01-03 09:00:00"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn procedure_codes_are_extracted_from_narrative_text_test() {
    init_test_tracing();
    let test = TestSync::new();
    let mut first = invoice(1, "2024-01-01 09:00:00");
    first.insert(
        "text_upper",
        "PATIENT WAS BILLED J1100 AND ALSO A9999 FOR SUPPLIES.",
    );
    let second = invoice(2, "2024-01-02 09:00:00");
    test.source
        .set_records("NarrativeReport", vec![first, second])
        .await;

    let descriptor = syncer::types::TableSyncDescriptor {
        code_extraction: Some(CodeExtraction {
            source_field: "text_upper".to_string(),
            target_field: "hcpcs".to_string(),
        }),
        ..incremental_table("NarrativeReport", "narrative_report")
    };
    test.orchestrator(vec![descriptor], 10, RunOptions::default())
        .run()
        .await
        .unwrap();

    for destination in [&test.row_store, &test.column_store] {
        let rows = destination.loader.table_rows("narrative_report").await;
        assert_eq!(rows[0].get("hcpcs"), Some(&Value::Text("J1100,A9999".into())));
        assert_eq!(rows[1].get("hcpcs"), Some(&Value::Text(String::new())));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn table_selection_honors_allow_and_ignore_lists_test() {
    init_test_tracing();
    let test = TestSync::new();
    test.set_invoices("Invoices", &[(1, "2024-01-01 09:00:00")])
        .await;
    test.set_invoices("Payments", &[(1, "2024-01-01 09:00:00")])
        .await;
    test.set_invoices("Refunds", &[(1, "2024-01-01 09:00:00")])
        .await;
    let descriptors = vec![
        incremental_table("Invoices", "invoices"),
        incremental_table("Payments", "payments"),
        incremental_table("Refunds", "refunds"),
    ];

    let options = RunOptions {
        tables: vec!["INVOICES".to_string(), "payments".to_string()],
        ignore: vec!["payments".to_string()],
        days_old: None,
    };
    let summary = test.orchestrator(descriptors, 10, options).run().await.unwrap();

    let synced: Vec<&str> = summary.tables.iter().map(|t| t.dest_table.as_str()).collect();
    assert_eq!(synced, vec!["invoices"]);
    assert!(test.source.requests_for("Payments").await.is_empty());
    assert!(test.source.requests_for("Refunds").await.is_empty());
}
