//! Tests for keyset pagination

use proptest::prelude::*;
use rivven_sqlsource::catalog::Catalog;
use rivven_sqlsource::dialect::{MySqlDialect, PostgresDialect};
use rivven_sqlsource::keyset::{compare_keys, KeysetFilter, KeysetQuery, ScanCursor};
use rivven_sqlsource::Value;
use std::cmp::Ordering;

fn key(a: i32, b: i32) -> Vec<Value> {
    vec![Value::Int32(a), Value::Int32(b)]
}

#[test]
fn test_two_column_filter_sql() {
    let columns = vec!["a".to_string(), "b".to_string()];
    let cursor = ScanCursor::new(key(1, 5));
    let filter = KeysetFilter::new(&columns, &cursor).unwrap();

    let (sql, params) = filter.to_sql(&PostgresDialect, 1).unwrap();
    assert_eq!(sql, "\"a\" > $1 OR (\"a\" = $2 AND \"b\" > $3)");
    assert_eq!(
        params,
        vec![Value::Int32(1), Value::Int32(1), Value::Int32(5)]
    );
}

#[test]
fn test_two_column_filter_membership() {
    let columns = vec!["a".to_string(), "b".to_string()];
    let cursor = ScanCursor::new(key(1, 5));
    let filter = KeysetFilter::new(&columns, &cursor).unwrap();

    assert!(!filter.matches(&key(1, 5)));
    assert!(!filter.matches(&key(1, 4)));
    assert!(!filter.matches(&key(0, 9)));
    assert!(filter.matches(&key(1, 6)));
    assert!(filter.matches(&key(2, 0)));
}

#[test]
fn test_placeholders_follow_dialect() {
    let columns = vec!["a".to_string(), "b".to_string()];
    let cursor = ScanCursor::new(key(1, 5));
    let filter = KeysetFilter::new(&columns, &cursor).unwrap();

    let (sql, _) = filter.to_sql(&MySqlDialect, 1).unwrap();
    assert_eq!(sql, "`a` > ? OR (`a` = ? AND `b` > ?)");

    let (sql, _) = filter.to_sql(&PostgresDialect, 4).unwrap();
    assert_eq!(sql, "\"a\" > $4 OR (\"a\" = $5 AND \"b\" > $6)");
}

#[test]
fn test_full_query_postgres() {
    let mut catalog = Catalog::new();
    catalog.add_column("public", "order_items", "order_id", true);
    catalog.add_column("public", "order_items", "line", true);
    catalog.add_column("public", "order_items", "sku", false);
    let table = catalog.table("public", "order_items").unwrap();

    let (sql, params) = KeysetQuery::new(table, &ScanCursor::start(), 1_000_000)
        .to_sql(&PostgresDialect)
        .unwrap();
    assert_eq!(
        sql,
        "SELECT \"order_id\", \"line\", \"sku\" FROM \"public\".\"order_items\" \
         ORDER BY \"order_id\" ASC, \"line\" ASC LIMIT 1000000"
    );
    assert!(params.is_empty());

    let cursor = ScanCursor::new(key(10, 2));
    let (sql, params) = KeysetQuery::new(table, &cursor, 50)
        .to_sql(&PostgresDialect)
        .unwrap();
    assert_eq!(
        sql,
        "SELECT \"order_id\", \"line\", \"sku\" FROM \"public\".\"order_items\" \
         WHERE (\"order_id\" > $1 OR (\"order_id\" = $2 AND \"line\" > $3)) \
         ORDER BY \"order_id\" ASC, \"line\" ASC LIMIT 50"
    );
    assert_eq!(params.len(), 3);
}

#[test]
fn test_query_without_primary_key_is_rejected() {
    let mut catalog = Catalog::new();
    catalog.add_column("public", "logs", "line", false);
    let table = catalog.table("public", "logs").unwrap();

    let err = KeysetQuery::new(table, &ScanCursor::start(), 10)
        .to_sql(&PostgresDialect)
        .unwrap_err();
    assert!(matches!(
        err,
        rivven_sqlsource::Error::MissingPrimaryKey { .. }
    ));
}

#[test]
fn test_values_never_inlined() {
    let columns = vec!["name".to_string()];
    let cursor = ScanCursor::new(vec![Value::from("x'; DROP TABLE users; --")]);
    let filter = KeysetFilter::new(&columns, &cursor).unwrap();

    let (sql, params) = filter.to_sql(&PostgresDialect, 1).unwrap();
    assert!(!sql.contains("DROP"));
    assert_eq!(params.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// The rendered disjunction agrees with tuple comparison
    #[test]
    fn test_filter_matches_tuple_order(
        cursor in prop::collection::vec(-3i32..3, 1..4),
        offset in prop::collection::vec(-3i32..3, 3),
    ) {
        let columns: Vec<String> = (0..cursor.len()).map(|i| format!("k{}", i)).collect();
        let cursor_values: Vec<Value> = cursor.iter().map(|&v| Value::Int32(v)).collect();
        let candidate: Vec<Value> = offset
            .iter()
            .take(cursor.len())
            .map(|&v| Value::Int32(v))
            .collect();

        let cursor = ScanCursor::new(cursor_values.clone());
        let filter = KeysetFilter::new(&columns, &cursor).unwrap();

        let expected = compare_keys(&candidate, &cursor_values) == Some(Ordering::Greater);
        prop_assert_eq!(filter.matches(&candidate), expected);

        let (_, params) = filter.to_sql(&PostgresDialect, 1).unwrap();
        let n = columns.len();
        prop_assert_eq!(params.len(), n * (n + 1) / 2);
    }
}
