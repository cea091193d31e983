//! Error types for rivven-sqlsource
//!
//! Errors are classified by how far their effect reaches:
//! - Run-fatal errors (connection, authentication, configuration, catalog load)
//! - Table-fatal errors (query, row iteration, missing primary key)
//! - Row-level errors (publish), which are logged and skipped

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for rivven-sqlsource operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Authentication failure
    Authentication,
    /// Query execution errors
    Query,
    /// Row iteration failed mid-chunk
    RowIteration,
    /// Schema or catalog shape errors
    Schema,
    /// Persisted catalog could not be loaded
    Catalog,
    /// Downstream publish failed
    Publish,
    /// Configuration error
    Configuration,
    /// Timeout errors (retriable)
    Timeout,
    /// I/O errors
    Io,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable.
    ///
    /// Nothing in this crate retries on its own; this is a hint for callers
    /// layering a retry policy above the orchestrator.
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::Publish)
    }
}

/// Main error type for rivven-sqlsource
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication failed
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Fetching the next row of a chunk failed
    #[error("row iteration failed: {message}")]
    RowIteration { message: String },

    /// Schema error (unexpected describe output, unknown table)
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Table has no primary key and cannot be paginated
    #[error("table {schema}.{table} has no primary key columns")]
    MissingPrimaryKey { schema: String, table: String },

    /// Row lacks a column the catalog requires
    #[error("column not found: {column} in table {table}")]
    ColumnNotFound { table: String, column: String },

    /// Cursor arity does not match the primary key
    #[error("cursor has {actual} values but the primary key has {expected} columns")]
    CursorArity { expected: usize, actual: usize },

    /// Persisted catalog is missing or empty
    #[error("catalog at {} is empty, run `describe` first", path.display())]
    CatalogEmpty { path: PathBuf },

    /// Persisted catalog could not be parsed
    #[error("catalog is corrupt: {message}")]
    CatalogCorrupt { message: String },

    /// Downstream publish failed
    #[error("publish failed for object {id} in {collection}: {message}")]
    Publish {
        id: String,
        collection: String,
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Query { .. } => ErrorCategory::Query,
            Self::RowIteration { .. } => ErrorCategory::RowIteration,
            Self::Schema { .. }
            | Self::MissingPrimaryKey { .. }
            | Self::ColumnNotFound { .. }
            | Self::CursorArity { .. } => ErrorCategory::Schema,
            Self::CatalogEmpty { .. } | Self::CatalogCorrupt { .. } => ErrorCategory::Catalog,
            Self::Publish { .. } => ErrorCategory::Publish,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Io(_) => ErrorCategory::Io,
            Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable.
    ///
    /// A failed table is never rescanned here; the orchestrator only logs
    /// this flag next to the failure.
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a row iteration error
    pub fn row_iteration(message: impl Into<String>) -> Self {
        Self::RowIteration {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(
        id: impl Into<String>,
        collection: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Publish {
            id: id.into(),
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Authentication => write!(f, "authentication"),
            Self::Query => write!(f, "query"),
            Self::RowIteration => write!(f, "row_iteration"),
            Self::Schema => write!(f, "schema"),
            Self::Catalog => write!(f, "catalog"),
            Self::Publish => write!(f, "publish"),
            Self::Configuration => write!(f, "configuration"),
            Self::Timeout => write!(f, "timeout"),
            Self::Io => write!(f, "io"),
            Self::Other => write!(f, "other"),
        }
    }
}
