//! Builds the shared resource handles (`cif_factory::Clients`) from
//! environment/CLI configuration, generalizing the original's
//! `cif.clients.get_clients` cached builder off its GCP-specific Spanner/
//! Pub/Sub/GCS clients onto this reimplementation's trait seams: a Postgres
//! pool for the catalog, the in-memory work queue (the only concrete
//! `WorkQueue` this core ships -- a real bus is an external collaborator per
//! spec.md §1), and an in-memory object store as the default backing for
//! blob-style connectors.

use std::sync::Arc;
use std::time::Duration;

use cif_catalog::{Catalog, PostgresCatalog};
use cif_factory::Clients;
use cif_queue::{InMemoryWorkQueue, WorkQueue};
use object_store::memory::InMemory;
use observability_deps::tracing::info;
use sqlx::postgres::PgPoolOptions;

use crate::error::{Error, Result};
use crate::logging::LogFormat;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Environment/CLI configuration shared by every subcommand, matching the
/// precedence `influxdb_iox/src/commands/run/test.rs` documents: command
/// line flags, then environment variables, then these defaults.
#[derive(Debug, clap::Parser)]
pub struct RunConfig {
    /// Catalog database connection string.
    #[clap(long = "catalog-url", env = "CIF_CATALOG_URL", default_value = "postgres://localhost/cif")]
    pub catalog_url: String,

    /// Work queue connection string. Only the `memory://` scheme is wired up
    /// by this binary; a production deployment's durable bus is plugged in
    /// as an external collaborator (spec.md §1).
    #[clap(long = "work-queue-url", env = "CIF_WORK_QUEUE_URL", default_value = "memory://cif-work")]
    pub work_queue_url: String,

    /// Per-database-query deadline (spec.md §5).
    #[clap(long = "query-timeout-secs", env = "CIF_QUERY_TIMEOUT_SECS", default_value = "30")]
    pub query_timeout_secs: u64,

    /// Per-publish deadline (spec.md §5); forwarded to bus clients that
    /// honor it. The in-memory queue completes synchronously and ignores it.
    #[clap(long = "publish-timeout-secs", env = "CIF_PUBLISH_TIMEOUT_SECS", default_value = "30")]
    pub publish_timeout_secs: u64,

    /// Output format for the tracing subscriber.
    #[clap(long = "log-format", env = "CIF_LOG_FORMAT", arg_enum, ignore_case = true, default_value = "logfmt")]
    pub log_format: LogFormat,
}

impl RunConfig {
    /// Connects every external resource and returns the bundle `cif_factory`
    /// needs to reify a [`cif_factory::Factory`].
    pub async fn build_clients(&self) -> Result<Clients> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(self.query_timeout_secs))
            .connect(&self.catalog_url)
            .await
            .map_err(|source| Error::CatalogConnect(cif_catalog::Error::from(source)))?;
        info!(catalog_url = %self.catalog_url, "connected to catalog database");

        MIGRATOR.run(&pool).await.map_err(Error::Migration)?;
        info!("catalog migrations applied");

        let catalog: Arc<dyn Catalog> = Arc::new(PostgresCatalog::new_with_timeout(
            pool.clone(),
            Duration::from_secs(self.query_timeout_secs),
        ));

        let queue: Arc<dyn WorkQueue> = match self.work_queue_url.split_once("://") {
            Some(("memory", _)) => Arc::new(InMemoryWorkQueue::new()),
            _ => return Err(Error::UnsupportedWorkQueue(self.work_queue_url.clone())),
        };
        info!(work_queue_url = %self.work_queue_url, "work queue configured");

        Ok(Clients { catalog, queue, object_store: Arc::new(InMemory::new()), tabular_pool: pool })
    }
}
