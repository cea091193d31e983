//! rivven-sqlsource - bulk snapshot of a relational database
//!
//! ```text
//! rivven-sqlsource describe --hostname db --username reader --database shop
//! rivven-sqlsource scan --hostname db --username reader --database shop \
//!     --concurrency 4 --output rows.jsonl -- sslmode=disable
//! ```
//!
//! `describe` writes the catalog (default `schema.json`) which `scan` then
//! reads. Edit the catalog in between to skip tables or columns.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rivven_sqlsource::{
    config::SourceConfig,
    connection::{ConnectionConfig, SensitiveString},
    postgres,
    publish::{JsonLinesPublisher, Publisher},
    runner,
};

#[derive(Parser)]
#[command(name = "rivven-sqlsource")]
#[command(version, about = "Bulk snapshot source for relational databases")]
struct Cli {
    /// Enable debug logging (queries and rows)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Introspect the database and write the catalog
    Describe {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Stream every catalog table downstream
    Scan {
        #[command(flatten)]
        source: SourceArgs,

        /// Write JSON lines to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// YAML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database host
    #[arg(long)]
    hostname: Option<String>,

    /// Database port
    #[arg(long)]
    port: Option<u16>,

    /// Database user
    #[arg(long)]
    username: Option<String>,

    /// Database password
    #[arg(long, env = "SQLSOURCE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Database name
    #[arg(long)]
    database: Option<String>,

    /// Tables scanned at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Catalog location
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Rows per chunk
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Extra backend options as key=value, appended to the connection URL
    #[arg(last = true)]
    options: Vec<String>,
}

impl SourceArgs {
    fn into_config(self) -> Result<SourceConfig> {
        let mut config = match &self.config {
            Some(path) => SourceConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => SourceConfig::new(ConnectionConfig::new("", 5432, "")),
        };

        let connection = &mut config.connection;
        if let Some(host) = self.hostname {
            connection.host = host;
        }
        if let Some(port) = self.port {
            connection.port = port;
        }
        if let Some(username) = self.username {
            connection.username = username;
        }
        if let Some(password) = self.password {
            connection.password = SensitiveString::new(password);
        }
        if let Some(database) = self.database {
            connection.database = database;
        }
        connection.options.extend(self.options);

        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(catalog) = self.catalog {
            config.catalog_path = catalog;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }

        config.check().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Describe { source } => {
            let config = source.into_config()?;
            let mut backend = postgres::backend().with_chunk_size(config.chunk_size);
            let catalog = runner::describe(&mut backend, &config)
                .await
                .context("describe failed")?;
            info!(tables = catalog.len(), "describe complete");
        }
        Commands::Scan { source, output } => {
            let config = source.into_config()?;
            let backend = Box::new(postgres::backend().with_chunk_size(config.chunk_size));
            let publisher: Arc<dyn Publisher> = match output {
                Some(path) => Arc::new(
                    JsonLinesPublisher::create(&path)
                        .await
                        .with_context(|| format!("failed to create {}", path.display()))?,
                ),
                None => Arc::new(JsonLinesPublisher::stdout()),
            };

            let summary = runner::scan(backend, publisher, &config)
                .await
                .context("scan failed")?;

            // failed tables are already logged; they never fail the run
            info!(
                tables = summary.outcomes().len(),
                failed = summary.failed().count(),
                rows = summary.total_rows(),
                publish_failures = summary.total_publish_failures(),
                "scan complete"
            );
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries published rows.
fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}
