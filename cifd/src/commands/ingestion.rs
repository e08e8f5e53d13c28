//! `ingestion <source_id>` -- runs one ingestion cycle end-to-end, grounded
//! on the original's `do_ingestion`: resolve the `Source`, build its
//! `Ingestion` pipeline, stage/promote/disaggregate.

use std::sync::Arc;

use cif_time::SystemProvider;
use cif_types::Error as CoreError;
use metric::Registry;
use observability_deps::tracing::info;

use crate::clients::RunConfig;
use crate::error::Result;

#[derive(Debug, clap::Parser)]
pub struct Config {
    #[clap(flatten)]
    pub run_config: RunConfig,

    /// 32-hex identifier of the source to ingest.
    pub source_id: String,
}

pub async fn command(config: Config) -> Result<()> {
    let clients = config.run_config.build_clients().await?;
    let factory = cif_factory::Factory::new(clients.clone(), Arc::new(Registry::new()), Arc::new(SystemProvider::new()));

    let source = clients
        .catalog
        .get_source(&config.source_id)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| CoreError::not_found("source", config.source_id.clone()))?;

    info!(source_id = %source.source_id, "running ingestion cycle");
    let ingestion = factory.new_ingestion(&source);
    ingestion.ingest().await?;
    info!(source_id = %source.source_id, "ingestion cycle finished");
    Ok(())
}
