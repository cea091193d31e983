//! Scan orchestration
//!
//! Runs one [`TableScan`] per catalog table on the tokio runtime. A
//! semaphore permit is taken before a table's task is spawned and held
//! until that task ends, so at most `concurrency` tables are in flight.
//! A table that fails, or whose task panics, is reported and the remaining
//! tables carry on.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::backend::Backend;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::publish::Publisher;
use crate::scan::{ScanReport, TableScan};

/// How a table scan ended
#[derive(Debug)]
pub enum TableStatus {
    /// Every row was visited
    Done,
    /// The scan stopped early
    Failed {
        /// Why it stopped
        error: Error,
    },
}

impl TableStatus {
    /// Whether the table completed
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Result of scanning one table
#[derive(Debug)]
pub struct TableOutcome {
    /// Schema name
    pub schema: String,
    /// Table name
    pub table: String,
    /// Terminal status
    pub status: TableStatus,
    /// Rows scanned, read from the catalog counter
    pub rows: u64,
    /// Chunk requests made, counted up to the failure for a failed table
    pub chunks: u64,
    /// Rows the publisher rejected
    pub publish_failures: u64,
}

/// Outcomes of a whole run, sorted by schema and table
#[derive(Debug, Default)]
pub struct ScanSummary {
    outcomes: Vec<TableOutcome>,
}

impl ScanSummary {
    /// All outcomes
    pub fn outcomes(&self) -> &[TableOutcome] {
        &self.outcomes
    }

    /// Tables that reached `Done`
    pub fn completed(&self) -> impl Iterator<Item = &TableOutcome> + '_ {
        self.outcomes.iter().filter(|o| o.status.is_done())
    }

    /// Tables that failed
    pub fn failed(&self) -> impl Iterator<Item = &TableOutcome> + '_ {
        self.outcomes.iter().filter(|o| !o.status.is_done())
    }

    /// Rows scanned across all tables
    pub fn total_rows(&self) -> u64 {
        self.outcomes.iter().map(|o| o.rows).sum()
    }

    /// Rows rejected by the publisher across all tables
    pub fn total_publish_failures(&self) -> u64 {
        self.outcomes.iter().map(|o| o.publish_failures).sum()
    }

    /// Outcome of one table
    pub fn outcome(&self, schema: &str, table: &str) -> Option<&TableOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.schema == schema && o.table == table)
    }

    /// Whether every table completed
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_done())
    }

    /// Log one line per table with its scanned row count
    pub fn log(&self) {
        for outcome in &self.outcomes {
            match &outcome.status {
                TableStatus::Done => info!(
                    schema = %outcome.schema,
                    table = %outcome.table,
                    rows = outcome.rows,
                    "scanned rows"
                ),
                TableStatus::Failed { error } => error!(
                    schema = %outcome.schema,
                    table = %outcome.table,
                    rows = outcome.rows,
                    error = %error,
                    "scanned rows before failure"
                ),
            }
        }
    }
}

/// Scans every catalog table with bounded parallelism
pub struct ScanOrchestrator {
    backend: Arc<dyn Backend>,
    publisher: Arc<dyn Publisher>,
    concurrency: usize,
}

impl ScanOrchestrator {
    /// Orchestrator scanning one table at a time
    pub fn new(backend: Arc<dyn Backend>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            backend,
            publisher,
            concurrency: 1,
        }
    }

    /// Set the number of tables scanned at once (at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Configured parallelism
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Scan every table and wait for all of them
    pub async fn run(&self, catalog: Arc<Catalog>) -> Result<ScanSummary> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles: Vec<(String, String, JoinHandle<(ScanReport, Option<Error>)>)> =
            Vec::with_capacity(catalog.len());

        for table in catalog.tables() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::internal("scan semaphore closed"))?;

            let schema = table.schema().to_string();
            let name = table.name().to_string();
            let catalog = Arc::clone(&catalog);
            let backend = Arc::clone(&self.backend);
            let publisher = Arc::clone(&self.publisher);
            let (task_schema, task_name) = (schema.clone(), name.clone());

            debug!(schema = %schema, table = %name, "spawning table scan");
            let handle = tokio::spawn(async move {
                let _permit = permit; // held until the table reaches Done or Failed
                let Some(table) = catalog.table(&task_schema, &task_name) else {
                    let error =
                        Error::schema(format!("table {}.{} left the catalog", task_schema, task_name));
                    return (ScanReport::default(), Some(error));
                };

                // a failed table keeps the progress it made before failing
                let mut scan = TableScan::new(table, backend.as_ref(), publisher.as_ref());
                let error = scan.run().await.err();
                (scan.report().clone(), error)
            });
            handles.push((schema, name, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (schema, name, handle) in handles {
            let (status, report) = match handle.await {
                Ok((report, None)) => (TableStatus::Done, report),
                Ok((report, Some(error))) => (TableStatus::Failed { error }, report),
                Err(e) => (
                    TableStatus::Failed {
                        error: Error::internal(format!("scan task aborted: {}", e)),
                    },
                    ScanReport::default(),
                ),
            };

            if let TableStatus::Failed { error } = &status {
                error!(
                    schema = %schema,
                    table = %name,
                    error = %error,
                    retriable = error.is_retriable(),
                    "table scan failed"
                );
            }

            let rows = catalog
                .table(&schema, &name)
                .map(|t| t.scanned_rows())
                .unwrap_or(0);

            outcomes.push(TableOutcome {
                schema,
                table: name,
                status,
                rows,
                chunks: report.chunks,
                publish_failures: report.publish_failures,
            });
        }

        outcomes.sort_by(|a, b| (&a.schema, &a.table).cmp(&(&b.schema, &b.table)));
        Ok(ScanSummary { outcomes })
    }
}
