//! Row publishing
//!
//! Every scanned row becomes an [`ObjectRecord`] carrying
//! - an identity: the primary-key values joined with `_`
//! - a collection: `snake_case("<schema>_<table>")`
//! - the row's columns as JSON properties
//!
//! and is handed to a [`Publisher`]. Publish failures are reported to the
//! caller, which logs and skips the row.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::catalog::Table;
use crate::error::{Error, Result};
use crate::types::Row;

/// Convert a string to snake_case.
///
/// Lower-cases, splits on camel-case and acronym boundaries, turns every
/// non-alphanumeric run into a single `_`, and trims `_` from both ends.
///
/// ```rust
/// use rivven_sqlsource::publish::to_snake_case;
///
/// assert_eq!(to_snake_case("Public_UserEvents"), "public_user_events");
/// assert_eq!(to_snake_case("HTTPServer"), "http_server");
/// ```
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len() + 8);

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !result.is_empty() && !result.ends_with('_') {
                result.push('_');
            }
            continue;
        }

        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // "aB", "2B" and the last capital of an acronym followed by "b"
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !result.is_empty() && !result.ends_with('_') {
                result.push('_');
            }
        }
        result.extend(c.to_lowercase());
    }

    while result.ends_with('_') {
        result.pop();
    }
    result
}

/// Downstream collection for a table
pub fn collection_name(schema: &str, table: &str) -> String {
    to_snake_case(&format!("{}_{}", schema, table))
}

/// Downstream identity of a row: its primary-key values joined with `_`
pub fn object_id(table: &Table, row: &Row) -> Result<String> {
    let mut parts = Vec::with_capacity(table.primary_keys().len());
    for key in table.primary_keys() {
        let value = row
            .get_by_name(key)
            .ok_or_else(|| Error::ColumnNotFound {
                table: table.qualified_name(),
                column: key.clone(),
            })?;
        parts.push(value.to_string());
    }
    Ok(parts.join("_"))
}

/// A row as handed to the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectRecord {
    /// Identity within the collection
    pub id: String,
    /// Grouping key
    pub collection: String,
    /// Column values
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl ObjectRecord {
    /// Build the record for a row of `table`
    pub fn from_row(table: &Table, row: Row) -> Result<Self> {
        let id = object_id(table, &row)?;
        let properties = row
            .into_map()
            .into_iter()
            .map(|(column, value)| (column, value.to_json()))
            .collect();
        Ok(Self {
            id,
            collection: collection_name(table.schema(), table.name()),
            properties,
        })
    }

    /// Serialize as a single JSON line (without the newline)
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::publish(&self.id, &self.collection, e.to_string()))
    }
}

/// Downstream object sink
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver one record
    async fn publish(&self, record: ObjectRecord) -> Result<()>;

    /// Push out anything buffered. Called once after all scans finish.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes one JSON object per line
pub struct JsonLinesPublisher<W> {
    writer: Mutex<BufWriter<W>>,
    published: AtomicU64,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesPublisher<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            published: AtomicU64::new(0),
        }
    }

    /// Records written so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Unwrap the underlying writer, flushing buffered output first
    pub async fn into_inner(self) -> Result<W> {
        let mut writer = self.writer.into_inner();
        writer.flush().await?;
        Ok(writer.into_inner())
    }
}

impl JsonLinesPublisher<tokio::io::Stdout> {
    /// Publisher writing to standard output
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl JsonLinesPublisher<tokio::fs::File> {
    /// Publisher writing to a new file at `path`
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = tokio::fs::File::create(path.as_ref()).await?;
        Ok(Self::new(file))
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Publisher for JsonLinesPublisher<W> {
    async fn publish(&self, record: ObjectRecord) -> Result<()> {
        let mut line = record.to_json()?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::publish(&record.id, &record.collection, e.to_string()))?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        Ok(())
    }
}

/// Collects records in memory; can reject chosen ids
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    records: StdMutex<Vec<ObjectRecord>>,
    reject: HashSet<String>,
    attempts: AtomicU64,
    flushed: AtomicBool,
}

impl MemoryPublisher {
    /// Create an empty publisher
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publish of a record with this id
    pub fn reject_id(mut self, id: impl Into<String>) -> Self {
        self.reject.insert(id.into());
        self
    }

    /// Records accepted so far, in arrival order
    pub fn records(&self) -> Vec<ObjectRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Accepted records of one collection, in arrival order
    pub fn records_for(&self, collection: &str) -> Vec<ObjectRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.collection == collection)
            .collect()
    }

    /// Publish calls, including rejected ones
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Whether `flush` has been called
    pub fn is_flushed(&self) -> bool {
        self.flushed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, record: ObjectRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.reject.contains(&record.id) {
            return Err(Error::publish(
                &record.id,
                &record.collection,
                "rejected by sink",
            ));
        }
        self.records
            .lock()
            .map_err(|_| Error::internal("record buffer poisoned"))?
            .push(record);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::types::Value;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("Public_UserEvents"), "public_user_events");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("userID"), "user_id");
        assert_eq!(to_snake_case("__order--items__"), "order_items");
        assert_eq!(to_snake_case("sales 2024"), "sales_2024");
        assert_eq!(to_snake_case("v2Table"), "v2_table");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case(""), "");
    }

    #[test]
    fn test_collection_name_stable() {
        let first = collection_name("Public", "UserEvents");
        assert_eq!(first, "public_user_events");
        assert_eq!(collection_name("Public", "UserEvents"), first);
    }

    #[test]
    fn test_object_id() {
        let mut catalog = Catalog::new();
        catalog.add_column("public", "users", "id", true);
        catalog.add_column("public", "pairs", "a", true);
        catalog.add_column("public", "pairs", "b", true);

        let users = catalog.table("public", "users").unwrap();
        let row = Row::from_pairs([("id", Value::Int64(42))]);
        assert_eq!(object_id(users, &row).unwrap(), "42");

        let pairs = catalog.table("public", "pairs").unwrap();
        let row = Row::from_pairs([("b", Value::from("x")), ("a", Value::Int32(1))]);
        assert_eq!(object_id(pairs, &row).unwrap(), "1_x");

        let row = Row::from_pairs([("a", Value::Int32(1))]);
        assert!(matches!(
            object_id(pairs, &row),
            Err(Error::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_record_from_row() {
        let mut catalog = Catalog::new();
        catalog.add_column("Sales", "OrderItems", "id", true);
        catalog.add_column("Sales", "OrderItems", "blob", false);
        let table = catalog.table("Sales", "OrderItems").unwrap();

        let row = Row::from_pairs([("id", Value::Int32(7)), ("blob", Value::Bytes(vec![1, 2]))]);
        let record = ObjectRecord::from_row(table, row).unwrap();
        assert_eq!(record.id, "7");
        assert_eq!(record.collection, "sales_order_items");
        assert_eq!(record.properties["blob"], serde_json::json!("AQI="));

        let json = record.to_json().unwrap();
        assert!(json.starts_with("{\"id\":\"7\""));
    }

    #[tokio::test]
    async fn test_json_lines_publisher() {
        let publisher = JsonLinesPublisher::new(Vec::new());
        for id in ["1", "2"] {
            publisher
                .publish(ObjectRecord {
                    id: id.to_string(),
                    collection: "public_users".to_string(),
                    properties: BTreeMap::new(),
                })
                .await
                .unwrap();
        }
        publisher.flush().await.unwrap();
        assert_eq!(publisher.published(), 2);

        let output = String::from_utf8(publisher.into_inner().await.unwrap()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "{\"id\":\"1\",\"collection\":\"public_users\",\"properties\":{}}"
        );
    }

    #[tokio::test]
    async fn test_memory_publisher_rejects() {
        let publisher = MemoryPublisher::new().reject_id("2");
        let record = |id: &str| ObjectRecord {
            id: id.to_string(),
            collection: "c".to_string(),
            properties: BTreeMap::new(),
        };

        publisher.publish(record("1")).await.unwrap();
        let err = publisher.publish(record("2")).await.unwrap_err();
        assert!(matches!(err, Error::Publish { ref id, .. } if id == "2"));
        assert_eq!(publisher.attempts(), 2);
        assert_eq!(publisher.records().len(), 1);
        assert!(!publisher.is_flushed());
    }
}
