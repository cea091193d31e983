//! Connection capability
//!
//! The scanner only needs a narrow slice of a database driver:
//! - `Connection`: run a parameterized query and hand back rows
//! - `ConnectionFactory`: open a `Connection` from a [`ConnectionConfig`]
//!
//! Drivers plug in behind these traits; the PostgreSQL one lives in
//! [`crate::postgres`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// A string that must never appear in logs or serialized configuration.
///
/// ```rust
/// use rivven_sqlsource::SensitiveString;
///
/// let secret = SensitiveString::new("hunter2");
/// assert_eq!(format!("{:?}", secret), "[REDACTED]");
/// assert_eq!(secret.expose_secret(), "hunter2");
/// ```
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value.
    ///
    /// Only call this where the value is handed to the driver.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the secret is the empty string
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl Default for SensitiveString {
    fn default() -> Self {
        Self::new("")
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Serialize as redacted so config dumps never carry the secret
impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// Where and how to connect
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConnectionConfig {
    /// Database host name or address
    #[validate(length(min = 1, message = "hostname is required"))]
    pub host: String,

    /// Database port
    #[validate(range(min = 1, message = "port must be positive"))]
    pub port: u16,

    /// User to authenticate as
    #[validate(length(min = 1, message = "username is required"))]
    pub username: String,

    /// Password for `username`
    #[serde(default)]
    pub password: SensitiveString,

    /// Database to connect to
    #[validate(length(min = 1, message = "database is required"))]
    pub database: String,

    /// Extra `key=value` options, appended to the URL query string
    #[serde(default)]
    pub options: Vec<String>,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: String::new(),
            password: SensitiveString::default(),
            database: String::new(),
            options: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration for `host:port/database`
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<SensitiveString>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Append a `key=value` backend option
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Check required fields before any network activity
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid connection settings: {}", e)))?;

        if let Some(bad) = self.options.iter().find(|o| !o.contains('=')) {
            return Err(Error::config(format!(
                "backend option '{}' is not of the form key=value",
                bad
            )));
        }
        Ok(())
    }

    /// Build the connection URL for `scheme`.
    ///
    /// Credentials are percent-encoded; options are joined with `&` into the
    /// query string.
    pub fn to_url(&self, scheme: &str) -> Result<url::Url> {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        let mut url = url::Url::parse(&format!("{}://{}:{}", scheme, host, self.port))
            .map_err(|e| Error::config(format!("invalid host '{}': {}", self.host, e)))?;
        url.set_path(&self.database);

        if !self.username.is_empty() {
            url.set_username(&self.username)
                .map_err(|_| Error::config("username cannot be set on this URL"))?;
        }
        if !self.password.is_empty() {
            url.set_password(Some(self.password.expose_secret()))
                .map_err(|_| Error::config("password cannot be set on this URL"))?;
        }
        if !self.options.is_empty() {
            url.set_query(Some(&self.options.join("&")));
        }
        Ok(url)
    }

    /// Connection URL with the password masked, safe for logs
    pub fn redacted_url(&self, scheme: &str) -> String {
        match self.to_url(scheme) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => "***".to_string(),
        }
    }
}

/// A live database session
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return the first row
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// PostgreSQL
    PostgreSQL,
    /// MySQL/MariaDB
    MySQL,
    /// SQL Server
    SqlServer,
    /// Anything else
    Unknown,
}

impl DatabaseType {
    /// URL scheme used for connection strings
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::MySQL => "mysql",
            Self::SqlServer => "sqlserver",
            Self::Unknown => "db",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "PostgreSQL"),
            Self::MySQL => write!(f, "MySQL"),
            Self::SqlServer => write!(f, "SQL Server"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}
