//! In-memory backend
//!
//! Holds tables as plain row vectors and serves chunks with the same keyset
//! predicate the SQL backends render. Used by the test suite and for dry
//! runs of the `scan` pipeline without a database.
//!
//! Failures can be injected per table, either when the chunk is requested or
//! while its rows are iterated.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{Backend, RowStream, VecRowStream};
use crate::catalog::{Catalog, Table};
use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};
use crate::keyset::{compare_keys, KeysetFilter, ScanCursor, DEFAULT_CHUNK_SIZE};
use crate::types::Row;

type TableKey = (String, String);

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    primary_keys: Vec<String>,
    rows: Vec<Row>,
}

/// Backend serving rows from memory
#[derive(Debug)]
pub struct MemoryBackend {
    tables: HashMap<TableKey, MemoryTable>,
    chunk_size: u64,
    latency: Option<Duration>,
    fail_scan: HashSet<TableKey>,
    fail_rows: HashMap<TableKey, usize>,
    refuse_connections: bool,
    cursors: Mutex<HashMap<TableKey, Vec<ScanCursor>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            latency: None,
            fail_scan: HashSet::new(),
            fail_rows: HashMap::new(),
            refuse_connections: false,
            cursors: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Delay every chunk request by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make `initialize` fail as if the server refused the connection
    pub fn refuse_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    /// Define a table. `primary_keys` must be a subset of `columns`.
    pub fn with_table(
        mut self,
        schema: &str,
        table: &str,
        columns: &[&str],
        primary_keys: &[&str],
    ) -> Self {
        let entry = self
            .tables
            .entry((schema.to_string(), table.to_string()))
            .or_default();
        entry.columns = columns.iter().map(|c| c.to_string()).collect();
        entry.primary_keys = primary_keys.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Append rows to a table defined with [`MemoryBackend::with_table`]
    pub fn with_rows(
        mut self,
        schema: &str,
        table: &str,
        rows: impl IntoIterator<Item = Row>,
    ) -> Self {
        self.tables
            .entry((schema.to_string(), table.to_string()))
            .or_default()
            .rows
            .extend(rows);
        self
    }

    /// Every chunk request for this table fails
    pub fn fail_scan(mut self, schema: &str, table: &str) -> Self {
        self.fail_scan.insert((schema.to_string(), table.to_string()));
        self
    }

    /// Row iteration for this table fails after `after_rows` rows
    pub fn fail_rows(mut self, schema: &str, table: &str, after_rows: usize) -> Self {
        self.fail_rows
            .insert((schema.to_string(), table.to_string()), after_rows);
        self
    }

    /// Cursors passed to `scan` for a table, in call order
    pub fn scan_cursors(&self, schema: &str, table: &str) -> Vec<ScanCursor> {
        self.cursors
            .lock()
            .map(|calls| {
                calls
                    .get(&(schema.to_string(), table.to_string()))
                    .cloned()
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Number of `scan` calls made for a table
    pub fn scan_calls(&self, schema: &str, table: &str) -> usize {
        self.scan_cursors(schema, table).len()
    }

    /// Highest number of `scan` calls that were in progress at once
    pub fn peak_concurrent_scans(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    fn record_call(&self, key: &TableKey, cursor: &ScanCursor) -> Result<()> {
        let mut calls = self
            .cursors
            .lock()
            .map_err(|_| Error::internal("scan call log poisoned"))?;
        calls.entry(key.clone()).or_default().push(cursor.clone());
        Ok(())
    }
}

/// Yields rows, then fails instead of ending the chunk
struct FailingRowStream {
    rows: VecRowStream,
    table: String,
}

impl RowStream for FailingRowStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        Box::pin(async move {
            match self.rows.next().await? {
                Some(row) => Ok(Some(row)),
                None => Err(Error::row_iteration(format!(
                    "connection reset while reading {}",
                    self.table
                ))),
            }
        })
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&mut self, config: &ConnectionConfig) -> Result<()> {
        if self.refuse_connections {
            return Err(Error::connection(format!(
                "connection refused by {}:{}",
                config.host, config.port
            )));
        }
        Ok(())
    }

    async fn describe(&self) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        for ((schema, table), data) in &self.tables {
            for column in &data.columns {
                let is_primary_key = data.primary_keys.contains(column);
                catalog.add_column(schema, table, column, is_primary_key);
            }
        }
        Ok(catalog)
    }

    async fn scan(&self, table: &Table, cursor: &ScanCursor) -> Result<Box<dyn RowStream>> {
        let key = (table.schema().to_string(), table.name().to_string());
        self.record_call(&key, cursor)?;

        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        let _guard = InFlight(&self.in_flight);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.fail_scan.contains(&key) {
            return Err(Error::query(format!(
                "relation {} does not exist",
                table.qualified_name()
            )));
        }

        let data = self.tables.get(&key).ok_or_else(|| {
            Error::query(format!("relation {} does not exist", table.qualified_name()))
        })?;

        let filter = KeysetFilter::new(table.primary_keys(), cursor)?;
        let mut chunk = Vec::new();
        for row in &data.rows {
            let candidate = ScanCursor::from_row(table, row)?;
            if filter.matches(candidate.values()) {
                chunk.push((candidate, row.clone()));
            }
        }
        chunk.sort_by(|(a, _), (b, _)| {
            compare_keys(a.values(), b.values()).unwrap_or(std::cmp::Ordering::Equal)
        });

        let limit = usize::try_from(self.chunk_size).unwrap_or(usize::MAX);
        let rows: Vec<Row> = chunk.into_iter().take(limit).map(|(_, row)| row).collect();

        match self.fail_rows.get(&key) {
            Some(&after) => Ok(Box::new(FailingRowStream {
                rows: VecRowStream::new(rows.into_iter().take(after).collect()),
                table: table.qualified_name(),
            })),
            None => Ok(Box::new(VecRowStream::new(rows))),
        }
    }

    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}
