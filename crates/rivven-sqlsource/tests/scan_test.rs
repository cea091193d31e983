//! Tests for the per-table scan state machine

use async_trait::async_trait;
use proptest::prelude::*;
use rivven_sqlsource::backend::{Backend, RowStream};
use rivven_sqlsource::catalog::{Catalog, Table};
use rivven_sqlsource::connection::ConnectionConfig;
use rivven_sqlsource::keyset::ScanCursor;
use rivven_sqlsource::memory::MemoryBackend;
use rivven_sqlsource::publish::MemoryPublisher;
use rivven_sqlsource::scan::{ScanState, TableScan};
use rivven_sqlsource::types::Row;
use rivven_sqlsource::{Error, Result, Value};
use std::collections::BTreeSet;

fn int_rows(ids: &[i32]) -> Vec<Row> {
    ids.iter()
        .map(|&id| Row::from_pairs([("id", Value::Int32(id)), ("name", Value::from("n"))]))
        .collect()
}

async fn single_table(backend: &MemoryBackend) -> Catalog {
    backend.describe().await.unwrap()
}

#[tokio::test]
async fn test_empty_table_single_call() {
    let backend = MemoryBackend::new().with_table("public", "empty", &["id"], &["id"]);
    let catalog = single_table(&backend).await;
    let table = catalog.table("public", "empty").unwrap();
    let publisher = MemoryPublisher::new();

    let mut scan = TableScan::new(table, &backend, &publisher);
    let report = scan.run().await.unwrap();

    assert_eq!(scan.state(), ScanState::Done);
    assert_eq!(report.rows, 0);
    assert_eq!(report.chunks, 1);
    assert!(report.cursor.is_empty());
    assert_eq!(backend.scan_calls("public", "empty"), 1);
    assert_eq!(publisher.attempts(), 0);
}

#[tokio::test]
async fn test_chunk_boundary_cursors() {
    let backend = MemoryBackend::new()
        .with_chunk_size(2)
        .with_table("public", "users", &["id", "name"], &["id"])
        .with_rows("public", "users", int_rows(&[1, 2, 3]));
    let catalog = single_table(&backend).await;
    let table = catalog.table("public", "users").unwrap();
    let publisher = MemoryPublisher::new();

    let report = TableScan::new(table, &backend, &publisher)
        .run()
        .await
        .unwrap();

    assert_eq!(report.chunks, 3);
    assert_eq!(
        backend.scan_cursors("public", "users"),
        vec![
            ScanCursor::start(),
            ScanCursor::new(vec![Value::Int32(2)]),
            ScanCursor::new(vec![Value::Int32(3)]),
        ]
    );
}

#[tokio::test]
async fn test_exact_multiple_of_chunk_size() {
    let backend = MemoryBackend::new()
        .with_chunk_size(2)
        .with_table("public", "users", &["id", "name"], &["id"])
        .with_rows("public", "users", int_rows(&[4, 3, 2, 1]));
    let catalog = single_table(&backend).await;
    let table = catalog.table("public", "users").unwrap();
    let publisher = MemoryPublisher::new();

    let report = TableScan::new(table, &backend, &publisher)
        .run()
        .await
        .unwrap();

    assert_eq!(report.rows, 4);
    assert_eq!(report.chunks, 3);
    assert_eq!(table.scanned_rows(), 4);
}

#[tokio::test]
async fn test_publish_failure_does_not_abort() {
    let backend = MemoryBackend::new()
        .with_chunk_size(2)
        .with_table("public", "users", &["id", "name"], &["id"])
        .with_rows("public", "users", int_rows(&[1, 2, 3, 4, 5]));
    let catalog = single_table(&backend).await;
    let table = catalog.table("public", "users").unwrap();
    let publisher = MemoryPublisher::new().reject_id("2").reject_id("4");

    let mut scan = TableScan::new(table, &backend, &publisher);
    let report = scan.run().await.unwrap();

    assert_eq!(scan.state(), ScanState::Done);
    assert_eq!(report.rows, 5);
    assert_eq!(report.publish_failures, 2);
    assert_eq!(publisher.attempts(), 5);

    let delivered: Vec<_> = publisher.records().into_iter().map(|r| r.id).collect();
    assert_eq!(delivered, vec!["1", "3", "5"]);
}

#[tokio::test]
async fn test_row_iteration_failure_fails_table() {
    let backend = MemoryBackend::new()
        .with_table("public", "users", &["id", "name"], &["id"])
        .with_rows("public", "users", int_rows(&[1, 2, 3]))
        .fail_rows("public", "users", 2);
    let catalog = single_table(&backend).await;
    let table = catalog.table("public", "users").unwrap();
    let publisher = MemoryPublisher::new();

    let mut scan = TableScan::new(table, &backend, &publisher);
    let err = scan.run().await.unwrap_err();

    assert!(matches!(err, Error::RowIteration { .. }));
    assert_eq!(scan.state(), ScanState::Failed);
    assert_eq!(scan.report().rows, 2);
    assert_eq!(scan.report().cursor, ScanCursor::new(vec![Value::Int32(2)]));
    assert_eq!(publisher.records().len(), 2);
}

#[tokio::test]
async fn test_scan_failure_fails_table() {
    let backend = MemoryBackend::new()
        .with_table("public", "users", &["id"], &["id"])
        .fail_scan("public", "users");
    let catalog = single_table(&backend).await;
    let table = catalog.table("public", "users").unwrap();
    let publisher = MemoryPublisher::new();

    let mut scan = TableScan::new(table, &backend, &publisher);
    let err = scan.run().await.unwrap_err();

    assert!(matches!(err, Error::Query { .. }));
    assert_eq!(scan.state(), ScanState::Failed);
}

/// Masks the `email` column of every row
struct MaskingBackend(MemoryBackend);

#[async_trait]
impl Backend for MaskingBackend {
    fn name(&self) -> &str {
        "masking"
    }

    async fn initialize(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.0.initialize(config).await
    }

    async fn describe(&self) -> Result<Catalog> {
        self.0.describe().await
    }

    async fn scan(&self, table: &Table, cursor: &ScanCursor) -> Result<Box<dyn RowStream>> {
        self.0.scan(table, cursor).await
    }

    fn transform(&self, mut row: Row) -> Row {
        row.set("email", "***");
        row
    }

    fn chunk_size(&self) -> u64 {
        self.0.chunk_size()
    }
}

#[tokio::test]
async fn test_transform_applied_before_publish() {
    let backend = MaskingBackend(
        MemoryBackend::new()
            .with_table("crm", "contacts", &["id", "email"], &["id"])
            .with_rows(
                "crm",
                "contacts",
                [Row::from_pairs([
                    ("id", Value::Int64(9)),
                    ("email", Value::from("a@example.com")),
                ])],
            ),
    );
    let catalog = backend.describe().await.unwrap();
    let table = catalog.table("crm", "contacts").unwrap();
    let publisher = MemoryPublisher::new();

    TableScan::new(table, &backend, &publisher)
        .run()
        .await
        .unwrap();

    let records = publisher.records_for("crm_contacts");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "9");
    assert_eq!(records[0].properties["email"], serde_json::json!("***"));
}

fn key_sets() -> impl Strategy<Value = (usize, BTreeSet<Vec<i32>>, u64)> {
    (1usize..=3).prop_flat_map(|arity| {
        (
            Just(arity),
            prop::collection::btree_set(prop::collection::vec(0i32..4, arity), 0..40),
            1u64..=7,
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every row is delivered exactly once, in ascending key order
    #[test]
    fn test_exactly_once_traversal((arity, keys, chunk_size) in key_sets()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let key_columns: Vec<String> = (0..arity).map(|i| format!("k{}", i)).collect();
        let mut columns: Vec<&str> = key_columns.iter().map(String::as_str).collect();
        let pks = columns.clone();
        columns.push("payload");

        // insert in descending order so the backend has to sort
        let rows: Vec<Row> = keys
            .iter()
            .rev()
            .map(|key| {
                let mut pairs: Vec<(String, Value)> = key
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (format!("k{}", i), Value::Int32(*v)))
                    .collect();
                pairs.push(("payload".to_string(), Value::from("p")));
                Row::from_pairs(pairs)
            })
            .collect();

        let backend = MemoryBackend::new()
            .with_chunk_size(chunk_size)
            .with_table("s", "t", &columns, &pks)
            .with_rows("s", "t", rows);
        let publisher = MemoryPublisher::new();

        let (report, ids) = runtime.block_on(async {
            let catalog = backend.describe().await.unwrap();
            let table = catalog.table("s", "t").unwrap();
            let report = TableScan::new(table, &backend, &publisher).run().await.unwrap();
            prop_assert_eq!(table.scanned_rows(), keys.len() as u64);
            let ids: Vec<String> = publisher.records().into_iter().map(|r| r.id).collect();
            Ok((report, ids))
        })?;

        let expected: Vec<String> = keys
            .iter()
            .map(|key| key.iter().map(i32::to_string).collect::<Vec<_>>().join("_"))
            .collect();
        prop_assert_eq!(ids, expected);

        let n = keys.len() as u64;
        let expected_chunks = n / chunk_size + 1 + u64::from(n % chunk_size != 0);
        prop_assert_eq!(report.chunks, expected_chunks);
        prop_assert_eq!(report.rows, n);
    }
}
