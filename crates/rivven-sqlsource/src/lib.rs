//! # rivven-sqlsource
//!
//! Bulk snapshot source for relational databases.
//!
//! A run happens in two steps:
//!
//! 1. **describe**: introspect every schema, table, column and primary key and
//!    persist the result as a JSON catalog (`schema.json` by default)
//! 2. **scan**: stream every row of every catalog table to a [`Publisher`],
//!    reading each table in bounded chunks with keyset pagination over its
//!    primary key
//!
//! ## Features
//!
//! - **Keyset Pagination**: compound keys of any arity, no `OFFSET`, every row
//!   visited exactly once regardless of chunk size
//! - **Parallel Tables**: bounded concurrency with per-table failure isolation
//! - **Pluggable Engines**: any [`Backend`]; SQL engines plug in through a
//!   [`ConnectionFactory`](connection::ConnectionFactory) and a
//!   [`SqlDialect`](dialect::SqlDialect)
//! - **Stable Identities**: each row is published with its primary-key id and a
//!   snake_case collection name
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_sqlsource::prelude::*;
//! use std::sync::Arc;
//!
//! let config = SourceConfig::from_file("sqlsource.yaml")?;
//!
//! let mut backend = rivven_sqlsource::postgres::backend();
//! runner::describe(&mut backend, &config).await?;
//!
//! let summary = runner::scan(
//!     Box::new(rivven_sqlsource::postgres::backend()),
//!     Arc::new(JsonLinesPublisher::stdout()),
//!     &config,
//! )
//! .await?;
//! println!("{} rows", summary.total_rows());
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` (default) - PostgreSQL support via tokio-postgres

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod backend;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod keyset;
pub mod memory;
pub mod orchestrator;
pub mod publish;
pub mod runner;
pub mod scan;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and row types
    pub use crate::types::{Row, Value};

    // Catalog
    pub use crate::catalog::{Catalog, Column, Table};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, SensitiveString,
    };

    // Dialects
    pub use crate::dialect::{
        dialect_for, MySqlDialect, PostgresDialect, SqlDialect, SqlServerDialect,
    };

    // Pagination
    pub use crate::keyset::{KeysetFilter, KeysetQuery, ScanCursor, DEFAULT_CHUNK_SIZE};

    // Backends
    pub use crate::backend::{Backend, RowStream, SqlBackend, VecRowStream};
    pub use crate::memory::MemoryBackend;

    // Publishing
    pub use crate::publish::{
        collection_name, object_id, JsonLinesPublisher, MemoryPublisher, ObjectRecord, Publisher,
    };

    // Scanning
    pub use crate::orchestrator::{ScanOrchestrator, ScanSummary, TableOutcome, TableStatus};
    pub use crate::scan::{ScanReport, ScanState, TableScan};

    // Configuration and run modes
    pub use crate::config::SourceConfig;
    pub use crate::runner;
}

// Re-export commonly used items at crate root
pub use backend::Backend;
pub use catalog::Catalog;
pub use connection::SensitiveString;
pub use error::{Error, Result};
pub use publish::Publisher;
pub use types::Value;
