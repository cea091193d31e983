//! Backend capability
//!
//! A [`Backend`] is everything the scanner needs from a database engine:
//! open a session, describe the reachable schema, return one keyset chunk
//! of a table, and optionally post-process rows.
//!
//! [`SqlBackend`] implements it for any SQL engine reachable through a
//! [`ConnectionFactory`] and a [`SqlDialect`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::catalog::{Catalog, Table};
use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::dialect::{dialect_for, SqlDialect};
use crate::error::{Error, Result};
use crate::keyset::{KeysetQuery, ScanCursor, DEFAULT_CHUNK_SIZE};
use crate::types::{Row, Value};

/// Streaming row iterator over one chunk
pub trait RowStream: Send {
    /// Get the next row, `None` once the chunk is exhausted
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>>;
}

/// Row stream over rows already in memory
#[derive(Debug, Default)]
pub struct VecRowStream {
    rows: VecDeque<Row>,
}

impl VecRowStream {
    /// Wrap a fully fetched chunk
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into() }
    }

    /// Rows not yet yielded
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowStream for VecRowStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        let row = self.rows.pop_front();
        Box::pin(async move { Ok(row) })
    }
}

/// Database engine capability used by the scanner
#[async_trait]
pub trait Backend: Send + Sync {
    /// Engine name, for logs
    fn name(&self) -> &str;

    /// Open a session with the database
    async fn initialize(&mut self, config: &ConnectionConfig) -> Result<()>;

    /// Enumerate every reachable schema, table and column
    async fn describe(&self) -> Result<Catalog>;

    /// Rows strictly after `cursor` in primary-key order, at most
    /// [`Backend::chunk_size`] of them
    async fn scan(&self, table: &Table, cursor: &ScanCursor) -> Result<Box<dyn RowStream>>;

    /// Post-process a row before it is published
    fn transform(&self, row: Row) -> Row {
        row
    }

    /// Maximum rows per chunk
    fn chunk_size(&self) -> u64 {
        DEFAULT_CHUNK_SIZE
    }

    /// Release the session
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Generic SQL backend: a connection factory plus a dialect
pub struct SqlBackend {
    factory: Arc<dyn ConnectionFactory>,
    dialect: Box<dyn SqlDialect>,
    connection: Option<Arc<dyn Connection>>,
    chunk_size: u64,
}

impl std::fmt::Debug for SqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlBackend")
            .field("database_type", &self.factory.database_type())
            .field("dialect", &self.dialect.name())
            .field("connected", &self.connection.is_some())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl SqlBackend {
    /// Backend using the dialect matching the factory's database type
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        let dialect = dialect_for(factory.database_type());
        Self::with_dialect(factory, dialect)
    }

    /// Backend with an explicit dialect
    pub fn with_dialect(factory: Arc<dyn ConnectionFactory>, dialect: Box<dyn SqlDialect>) -> Self {
        Self {
            factory,
            dialect,
            connection: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The dialect in use
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    fn connection(&self) -> Result<&Arc<dyn Connection>> {
        self.connection
            .as_ref()
            .ok_or_else(|| Error::connection("backend is not initialized"))
    }
}

fn text_column<'a>(row: &'a Row, column: &str) -> Result<&'a str> {
    row.get_by_name(column)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::schema(format!("catalog query returned no text column '{}'", column)))
}

#[async_trait]
impl Backend for SqlBackend {
    fn name(&self) -> &str {
        self.dialect.name()
    }

    async fn initialize(&mut self, config: &ConnectionConfig) -> Result<()> {
        config.check()?;

        let scheme = self.factory.database_type().scheme();
        info!(url = %config.redacted_url(scheme), "connecting");

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let connection = tokio::time::timeout(timeout, self.factory.connect(config))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "connecting to {}:{} took longer than {:?}",
                    config.host, config.port, timeout
                ))
            })??;

        self.connection = Some(Arc::from(connection));
        Ok(())
    }

    async fn describe(&self) -> Result<Catalog> {
        let connection = self.connection()?;
        let sql = self.dialect.describe_catalog_sql();
        debug!(query = %sql, "executing catalog query");

        let rows = connection.query(sql, &[]).await?;
        let mut catalog = Catalog::new();
        for row in &rows {
            let schema = text_column(row, "table_schema")?;
            let table = text_column(row, "table_name")?;
            let column = text_column(row, "column_name")?;
            let is_primary_key = row
                .get_by_name("is_primary_key")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            catalog.add_column(schema, table, column, is_primary_key);
        }

        Ok(catalog)
    }

    async fn scan(&self, table: &Table, cursor: &ScanCursor) -> Result<Box<dyn RowStream>> {
        let connection = self.connection()?;
        let (sql, params) = KeysetQuery::new(table, cursor, self.chunk_size).to_sql(self.dialect())?;
        debug!(query = %sql, cursor = %cursor, "executing query");

        let rows = connection.query(&sql, &params).await.map_err(|e| match e {
            Error::Query {
                message,
                sql: None,
                source,
            } => Error::Query {
                message,
                sql: Some(sql.clone()),
                source,
            },
            other => other,
        })?;
        Ok(Box::new(VecRowStream::new(rows)))
    }

    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    async fn close(&self) -> Result<()> {
        match &self.connection {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }
}
