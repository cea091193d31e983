//! Per-table chunked scan
//!
//! ```text
//! Start -> FetchingChunk -> Delivering -> FetchingChunk -> ... -> Done
//!                 \               \
//!                  +---------------+--> Failed
//! ```
//!
//! A table is finished when a chunk comes back empty, so a scan always ends
//! with one extra fetch. Publish failures are logged and skipped; every
//! other error fails only this table.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::catalog::Table;
use crate::error::{Error, Result};
use crate::keyset::ScanCursor;
use crate::publish::{ObjectRecord, Publisher};
use crate::types::Row;

/// State of a table scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum ScanState {
    /// Not started
    #[default]
    Start,
    /// Waiting for the backend to return a chunk
    FetchingChunk,
    /// Handing rows of the current chunk downstream
    Delivering,
    /// Every row was visited
    Done,
    /// The scan stopped on an error
    Failed,
}

impl ScanState {
    /// Whether the scan has stopped
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::FetchingChunk => write!(f, "fetching_chunk"),
            Self::Delivering => write!(f, "delivering"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What one table scan did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    /// Rows read from the backend
    pub rows: u64,
    /// Chunk requests, the final empty one included
    pub chunks: u64,
    /// Rows the publisher rejected
    pub publish_failures: u64,
    /// Key of the last row delivered
    pub cursor: ScanCursor,
}

/// Scan of a single table
pub struct TableScan<'a> {
    table: &'a Table,
    backend: &'a dyn Backend,
    publisher: &'a dyn Publisher,
    state: ScanState,
    report: ScanReport,
}

impl<'a> TableScan<'a> {
    /// Prepare a scan positioned before the first row
    pub fn new(table: &'a Table, backend: &'a dyn Backend, publisher: &'a dyn Publisher) -> Self {
        Self {
            table,
            backend,
            publisher,
            state: ScanState::Start,
            report: ScanReport::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Progress so far
    pub fn report(&self) -> &ScanReport {
        &self.report
    }

    /// Run the scan to `Done` or `Failed`
    pub async fn run(&mut self) -> Result<ScanReport> {
        info!(
            schema = self.table.schema(),
            table = self.table.name(),
            "scan started"
        );

        match self.drive().await {
            Ok(()) => {
                self.state = ScanState::Done;
                info!(
                    schema = self.table.schema(),
                    table = self.table.name(),
                    rows = self.report.rows,
                    chunks = self.report.chunks,
                    "scan finished"
                );
                Ok(self.report.clone())
            }
            Err(e) => {
                self.state = ScanState::Failed;
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        if !self.table.has_primary_key() {
            return Err(Error::MissingPrimaryKey {
                schema: self.table.schema().to_string(),
                table: self.table.name().to_string(),
            });
        }

        loop {
            self.state = ScanState::FetchingChunk;
            let mut rows = self.backend.scan(self.table, &self.report.cursor).await?;
            self.report.chunks += 1;

            self.state = ScanState::Delivering;
            let mut delivered = 0u64;
            while let Some(row) = rows.next().await? {
                self.table.record_scanned();
                self.report.rows += 1;
                debug!(table = %self.table.qualified_name(), ?row, "received row");

                let cursor = ScanCursor::from_row(self.table, &row)?;
                let row = self.backend.transform(row);
                self.deliver(row).await;

                self.report.cursor = cursor;
                delivered += 1;
            }

            if delivered == 0 {
                return Ok(());
            }
        }
    }

    async fn deliver(&mut self, row: Row) {
        let result = match ObjectRecord::from_row(self.table, row) {
            Ok(record) => self.publisher.publish(record).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.report.publish_failures += 1;
            warn!(
                schema = self.table.schema(),
                table = self.table.name(),
                error = %e,
                "failed to publish row"
            );
        }
    }
}
