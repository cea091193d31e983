//! Schema catalog
//!
//! The catalog records every table a backend described, together with the
//! ordered column and primary-key lists the scanner paginates over. It is
//! persisted between the `describe` and `scan` runs so operators can inspect
//! or edit it in between.
//!
//! ```json
//! {
//!   "public": {
//!     "users": { "primary_keys": ["id"], "columns": ["id", "name"] }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// A described column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Schema name
    pub schema: String,
    /// Table name
    pub table: String,
    /// Column name
    pub name: String,
    /// Whether the column participates in the table's primary key
    pub is_primary_key: bool,
}

impl Column {
    /// Create a column description
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        is_primary_key: bool,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            name: name.into(),
            is_primary_key,
        }
    }
}

/// A table in the catalog.
///
/// `primary_keys` keeps the order columns were described in; pagination
/// compares key tuples in exactly this order.
#[derive(Debug)]
pub struct Table {
    schema: String,
    name: String,
    columns: Vec<String>,
    primary_keys: Vec<String>,
    /// Rows scanned this run. Written only by the scan owning this table.
    scanned_rows: AtomicU64,
}

impl Table {
    /// Create an empty table
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            scanned_rows: AtomicU64::new(0),
        }
    }

    /// Schema name
    #[inline]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column names in description order
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Primary key column names in description order
    #[inline]
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// Whether the table can be paginated
    #[inline]
    pub fn has_primary_key(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    /// Get fully qualified name
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Rows scanned so far
    #[inline]
    pub fn scanned_rows(&self) -> u64 {
        self.scanned_rows.load(Ordering::Acquire)
    }

    /// Count one scanned row
    #[inline]
    pub fn record_scanned(&self) -> u64 {
        self.scanned_rows.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn push_column(&mut self, column: &str, is_primary_key: bool) {
        if self.columns.iter().any(|c| c == column) {
            return;
        }
        self.columns.push(column.to_string());
        if is_primary_key {
            self.primary_keys.push(column.to_string());
        }
    }
}

/// Persisted shape of a table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TableDocument {
    #[serde(default)]
    primary_keys: Vec<String>,
    #[serde(default)]
    columns: Vec<String>,
}

type CatalogDocument = BTreeMap<String, BTreeMap<String, TableDocument>>;

/// All described tables, keyed by schema and then table name
#[derive(Debug, Default)]
pub struct Catalog {
    schemas: HashMap<String, HashMap<String, Table>>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a described column, creating its table on first sight.
    ///
    /// Columns keep first-seen order; re-adding a known column is a no-op.
    pub fn add_column(&mut self, schema: &str, table: &str, column: &str, is_primary_key: bool) {
        self.schemas
            .entry(schema.to_string())
            .or_default()
            .entry(table.to_string())
            .or_insert_with(|| Table::new(schema, table))
            .push_column(column, is_primary_key);
    }

    /// Record a [`Column`]
    pub fn add(&mut self, column: &Column) {
        self.add_column(
            &column.schema,
            &column.table,
            &column.name,
            column.is_primary_key,
        );
    }

    /// Look up a table
    pub fn table(&self, schema: &str, table: &str) -> Option<&Table> {
        self.schemas.get(schema).and_then(|t| t.get(table))
    }

    /// Iterate over every table. Order is unspecified.
    pub fn tables(&self) -> impl Iterator<Item = &Table> + '_ {
        self.schemas.values().flat_map(|tables| tables.values())
    }

    /// Tables that cannot be paginated
    pub fn tables_without_primary_key(&self) -> impl Iterator<Item = &Table> + '_ {
        self.tables().filter(|t| !t.has_primary_key())
    }

    /// Number of tables
    pub fn len(&self) -> usize {
        self.schemas.values().map(HashMap::len).sum()
    }

    /// Whether the catalog has no tables
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_document(&self) -> CatalogDocument {
        self.schemas
            .iter()
            .map(|(schema, tables)| {
                let tables = tables
                    .iter()
                    .map(|(name, table)| {
                        (
                            name.clone(),
                            TableDocument {
                                primary_keys: table.primary_keys.clone(),
                                columns: table.columns.clone(),
                            },
                        )
                    })
                    .collect();
                (schema.clone(), tables)
            })
            .collect()
    }

    fn from_document(document: CatalogDocument) -> Self {
        let schemas = document
            .into_iter()
            .map(|(schema, tables)| {
                let tables = tables
                    .into_iter()
                    .map(|(name, doc)| {
                        let table = Table {
                            schema: schema.clone(),
                            name: name.clone(),
                            columns: doc.columns,
                            primary_keys: doc.primary_keys,
                            scanned_rows: AtomicU64::new(0),
                        };
                        (name, table)
                    })
                    .collect();
                (schema, tables)
            })
            .collect();
        Self { schemas }
    }

    /// Serialize the catalog as pretty-printed JSON
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, &self.to_document())
            .map_err(|e| Error::internal(format!("failed to serialize catalog: {}", e)))
    }

    /// Serialize the catalog into a string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_document())
            .map_err(|e| Error::internal(format!("failed to serialize catalog: {}", e)))
    }

    /// Deserialize a catalog.
    ///
    /// `source` names the document in the error raised when it is empty.
    pub fn from_reader<R: Read>(mut reader: R, source: &Path) -> Result<Self> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        if content.trim().is_empty() {
            return Err(Error::CatalogEmpty {
                path: source.to_path_buf(),
            });
        }

        let document: CatalogDocument =
            serde_json::from_str(&content).map_err(|e| Error::CatalogCorrupt {
                message: e.to_string(),
            })?;

        let catalog = Self::from_document(document);
        if catalog.is_empty() {
            return Err(Error::CatalogEmpty {
                path: source.to_path_buf(),
            });
        }
        Ok(catalog)
    }

    /// Write the catalog to a file, replacing any previous content
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        self.to_writer(&mut writer)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Load the catalog a previous `describe` run wrote
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CatalogEmpty {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_reader(BufReader::new(file), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_column("public", "users", "id", true);
        catalog.add_column("public", "users", "email", false);
        catalog.add_column("public", "users", "tenant", true);
        catalog
    }

    #[test]
    fn test_add_column_preserves_order() {
        let catalog = users_catalog();
        let table = catalog.table("public", "users").unwrap();

        assert_eq!(table.columns(), ["id", "email", "tenant"]);
        assert_eq!(table.primary_keys(), ["id", "tenant"]);
        assert_eq!(table.qualified_name(), "public.users");
    }

    #[test]
    fn test_add_column_idempotent() {
        let mut catalog = users_catalog();
        catalog.add_column("public", "users", "id", true);
        catalog.add(&Column::new("public", "users", "email", false));

        let table = catalog.table("public", "users").unwrap();
        assert_eq!(table.columns().len(), 3);
        assert_eq!(table.primary_keys().len(), 2);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_scan_counter() {
        let catalog = users_catalog();
        let table = catalog.table("public", "users").unwrap();

        assert_eq!(table.scanned_rows(), 0);
        assert_eq!(table.record_scanned(), 1);
        assert_eq!(table.record_scanned(), 2);
        assert_eq!(table.scanned_rows(), 2);
    }

    #[test]
    fn test_document_omits_counters() {
        let catalog = users_catalog();
        catalog.table("public", "users").unwrap().record_scanned();

        let json = catalog.to_json().unwrap();
        assert!(json.contains("primary_keys"));
        assert!(!json.contains("scanned"));

        let loaded = Catalog::from_reader(json.as_bytes(), Path::new("inline")).unwrap();
        assert_eq!(loaded.table("public", "users").unwrap().scanned_rows(), 0);
    }

    #[test]
    fn test_empty_document_is_reported() {
        let err = Catalog::from_reader("  \n".as_bytes(), Path::new("schema.json")).unwrap_err();
        assert!(matches!(err, Error::CatalogEmpty { .. }));

        let err = Catalog::from_reader("{}".as_bytes(), Path::new("schema.json")).unwrap_err();
        assert!(matches!(err, Error::CatalogEmpty { .. }));
    }

    #[test]
    fn test_corrupt_document_is_reported() {
        let err = Catalog::from_reader("{\"public\": [".as_bytes(), Path::new("x")).unwrap_err();
        assert!(matches!(err, Error::CatalogCorrupt { .. }));
    }

    #[test]
    fn test_tables_without_primary_key() {
        let mut catalog = users_catalog();
        catalog.add_column("audit", "events", "payload", false);

        let keyless: Vec<_> = catalog
            .tables_without_primary_key()
            .map(Table::qualified_name)
            .collect();
        assert_eq!(keyless, vec!["audit.events".to_string()]);
    }
}
