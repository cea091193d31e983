//! Source configuration
//!
//! Settings come from CLI flags or from a YAML file. In the file, `${VAR}`
//! and `${VAR:-default}` are replaced from the environment before parsing:
//!
//! ```yaml
//! connection:
//!   host: ${PGHOST:-localhost}
//!   port: 5432
//!   username: reader
//!   password: ${PGPASSWORD}
//!   database: shop
//!   options: ["sslmode=require"]
//! concurrency: 4
//! catalog_path: schema.json
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use validator::Validate;

use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};
use crate::keyset::DEFAULT_CHUNK_SIZE;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Default location of the persisted catalog
pub const DEFAULT_CATALOG_PATH: &str = "schema.json";

/// Everything a describe or scan run needs
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    /// Database connection
    #[validate(nested)]
    pub connection: ConnectionConfig,

    /// Tables scanned at once
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 256))]
    pub concurrency: usize,

    /// Where `describe` writes the catalog and `scan` reads it
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Rows per chunk
    #[serde(default = "default_chunk_size")]
    #[validate(range(min = 1))]
    pub chunk_size: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from(DEFAULT_CATALOG_PATH)
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

impl SourceConfig {
    /// Configuration with defaults for everything but the connection
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            concurrency: default_concurrency(),
            catalog_path: default_catalog_path(),
            chunk_size: default_chunk_size(),
        }
    }

    /// Set the number of tables scanned at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the catalog location
    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = path.into();
        self
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML, expanding environment variables first
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::config(format!("failed to parse config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Validate every field, the connection included
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;
        self.connection.check()
    }
}

/// Replace `${VAR}` and `${VAR:-default}` with values from the environment.
///
/// Unset variables without a default become the empty string.
pub fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}
