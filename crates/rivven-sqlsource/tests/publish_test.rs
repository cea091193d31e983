//! Tests for row identities and publishers

use rivven_sqlsource::catalog::Catalog;
use rivven_sqlsource::publish::{
    collection_name, object_id, to_snake_case, JsonLinesPublisher, ObjectRecord, Publisher,
};
use rivven_sqlsource::types::Row;
use rivven_sqlsource::{Error, Value};

#[test]
fn test_identity_single_key() {
    let mut catalog = Catalog::new();
    catalog.add_column("public", "users", "id", true);
    catalog.add_column("public", "users", "name", false);
    let table = catalog.table("public", "users").unwrap();

    let row = Row::from_pairs([("id", Value::Int64(42)), ("name", Value::from("ada"))]);
    assert_eq!(object_id(table, &row).unwrap(), "42");
}

#[test]
fn test_identity_follows_key_order() {
    let mut catalog = Catalog::new();
    catalog.add_column("public", "tags", "tag", true);
    catalog.add_column("public", "tags", "id", true);
    let table = catalog.table("public", "tags").unwrap();

    // column order in the row does not matter, key order does
    let row = Row::from_pairs([("id", Value::Int32(1)), ("tag", Value::from("x"))]);
    assert_eq!(object_id(table, &row).unwrap(), "x_1");
}

#[test]
fn test_identity_missing_key_column() {
    let mut catalog = Catalog::new();
    catalog.add_column("public", "users", "id", true);
    let table = catalog.table("public", "users").unwrap();

    let row = Row::from_pairs([("name", Value::from("ada"))]);
    assert!(matches!(
        object_id(table, &row).unwrap_err(),
        Error::ColumnNotFound { .. }
    ));
}

#[test]
fn test_collection_names() {
    assert_eq!(collection_name("public", "UserEvents"), "public_user_events");
    assert_eq!(collection_name("Sales", "order items"), "sales_order_items");
    assert_eq!(collection_name("dbo", "APIKeys"), "dbo_api_keys");
    assert_eq!(to_snake_case("__Weird--Name__"), "weird_name");
}

#[tokio::test]
async fn test_json_lines_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rows.jsonl");

    let mut catalog = Catalog::new();
    catalog.add_column("public", "users", "id", true);
    catalog.add_column("public", "users", "name", false);
    let table = catalog.table("public", "users").unwrap();

    let publisher = JsonLinesPublisher::create(&path).await.unwrap();
    for (id, name) in [(1_i64, "ada"), (2, "grace")] {
        let row = Row::from_pairs([("id", Value::Int64(id)), ("name", Value::from(name))]);
        publisher
            .publish(ObjectRecord::from_row(table, row).unwrap())
            .await
            .unwrap();
    }
    publisher.flush().await.unwrap();
    assert_eq!(publisher.published(), 2);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], "1");
    assert_eq!(lines[0]["collection"], "public_users");
    assert_eq!(lines[1]["properties"]["name"], "grace");
    assert_eq!(lines[1]["properties"]["id"], 2);
}

#[test]
fn test_null_and_bytes_properties() {
    let mut catalog = Catalog::new();
    catalog.add_column("public", "files", "id", true);
    catalog.add_column("public", "files", "data", false);
    catalog.add_column("public", "files", "owner", false);
    let table = catalog.table("public", "files").unwrap();

    let row = Row::from_pairs([
        ("id", Value::Int32(7)),
        ("data", Value::Bytes(vec![0xde, 0xad])),
        ("owner", Value::Null),
    ]);
    let record = ObjectRecord::from_row(table, row).unwrap();
    assert_eq!(record.properties["owner"], serde_json::Value::Null);
    assert!(record.properties["data"].is_string());
}
