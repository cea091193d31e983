//! Describe and scan run modes
//!
//! - [`describe`] connects, introspects the database and persists the catalog
//! - [`scan`] loads that catalog, connects and streams every table downstream
//!
//! Catalog and configuration problems are reported before any connection is
//! attempted.

use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::catalog::Catalog;
use crate::config::SourceConfig;
use crate::error::Result;
use crate::orchestrator::{ScanOrchestrator, ScanSummary};
use crate::publish::Publisher;

/// Describe the database and write the catalog to `config.catalog_path`
pub async fn describe(backend: &mut dyn Backend, config: &SourceConfig) -> Result<Catalog> {
    config.check()?;
    backend.initialize(&config.connection).await?;

    let catalog = backend.describe().await?;
    for table in catalog.tables_without_primary_key() {
        warn!(
            schema = table.schema(),
            table = table.name(),
            "table has no primary key and will fail to scan"
        );
    }

    catalog.save_to_path(&config.catalog_path)?;
    info!(
        path = %config.catalog_path.display(),
        tables = catalog.len(),
        "saved catalog"
    );

    if let Err(e) = backend.close().await {
        warn!(error = %e, "failed to close backend");
    }
    Ok(catalog)
}

/// Scan every table of the persisted catalog into `publisher`
pub async fn scan(
    mut backend: Box<dyn Backend>,
    publisher: Arc<dyn Publisher>,
    config: &SourceConfig,
) -> Result<ScanSummary> {
    config.check()?;
    let catalog = Arc::new(Catalog::load_from_path(&config.catalog_path)?);
    info!(
        path = %config.catalog_path.display(),
        tables = catalog.len(),
        concurrency = config.concurrency,
        backend = backend.name(),
        "loaded catalog"
    );

    backend.initialize(&config.connection).await?;
    let backend: Arc<dyn Backend> = Arc::from(backend);

    let summary = ScanOrchestrator::new(Arc::clone(&backend), Arc::clone(&publisher))
        .with_concurrency(config.concurrency)
        .run(catalog)
        .await?;

    publisher.flush().await?;
    summary.log();

    if let Err(e) = backend.close().await {
        warn!(error = %e, "failed to close backend");
    }
    Ok(summary)
}
