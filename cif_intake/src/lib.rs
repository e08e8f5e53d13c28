//! Drives intake: staging a connector's artifacts, then promoting them into
//! a new generation when they differ from the source's latest one.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

use std::sync::Arc;

use cif_catalog::Catalog;
use cif_connector::Connector;
use cif_time::{Time, TimeProviderRef};
use cif_types::{Generation, Result, Source};
use observability_deps::tracing::info;
use uuid::Uuid;

/// Stages and promotes one [`Source`]'s artifacts into the catalog.
#[derive(Debug)]
pub struct Intake {
    catalog: Arc<dyn Catalog>,
    connector: Arc<dyn Connector>,
    source: Source,
    time_provider: TimeProviderRef,
}

impl Intake {
    pub fn new(catalog: Arc<dyn Catalog>, connector: Arc<dyn Connector>, source: Source, time_provider: TimeProviderRef) -> Self {
        Self { catalog, connector, source, time_provider }
    }

    /// Stages this source's artifacts and, if they differ from the latest
    /// generation, promotes them into a new one. Returns `None` ("no
    /// change") if staging produced nothing or nothing differs from the
    /// latest generation.
    pub async fn intake(&self, use_stage_id: Option<String>, use_created_on: Option<Time>) -> Result<Option<Generation>> {
        let stage_id = use_stage_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let created_on = use_created_on.unwrap_or_else(|| self.time_provider.now());

        let num_batches = self.stage(&stage_id, created_on).await?;
        if num_batches == 0 {
            info!(source_id = %self.source.source_id, "no data staged");
            return Ok(None);
        }

        let latest = self.catalog.get_latest_generation(&self.source.source_id).await?;
        if let Some(latest) = &latest {
            let inserted_updated = self
                .catalog
                .count_inserted_updated(&stage_id, &self.source.source_id, latest.generation_id)
                .await?;
            let deleted = self
                .catalog
                .count_deleted(&stage_id, &self.source.source_id, latest.generation_id)
                .await?;
            if inserted_updated == 0 && deleted == 0 {
                info!(
                    source_id = %self.source.source_id,
                    generation_id = latest.generation_id,
                    stage_id,
                    "no changes detected, skipping generation"
                );
                return Ok(None);
            }
            info!(
                source_id = %self.source.source_id,
                generation_id = latest.generation_id,
                stage_id,
                inserted_updated,
                deleted,
                "changes detected, creating new generation"
            );
        }

        self.create_new_generation(&stage_id, num_batches).await?;
        let generation = self.catalog.get_latest_generation(&self.source.source_id).await?;
        Ok(generation)
    }

    /// Stages this source's artifacts in batches of `STAGING_BATCH_SIZE`.
    /// Returns the number of batches staged.
    async fn stage(&self, stage_id: &str, created_on: Time) -> Result<usize> {
        info!(stage_id, source_id = %self.source.source_id, "starting stage");
        let artifacts = self.connector.list_artifacts().await?;

        let mut num_rows = 0;
        let mut batch_id = 0i64;
        for batch in artifacts.chunks(cif_catalog::STAGING_BATCH_SIZE) {
            let rows = self.catalog.insert_stage_batch(stage_id, &self.source.source_id, batch_id, batch, created_on).await?;
            num_rows += rows;
            batch_id += 1;
        }
        info!(num_rows, num_batches = batch_id, stage_id, "staged artifacts");
        Ok(batch_id as usize)
    }

    /// Promotes every staged batch into `artifact`/`generation` rows.
    async fn create_new_generation(&self, stage_id: &str, num_batches: usize) -> Result<(i64, i64, i64)> {
        let mut counts = (0i64, 0i64, 0i64);
        for batch_id in 0..num_batches as i64 {
            let batch_counts = self
                .catalog
                .insert_artifact_generation_batch(stage_id, &self.source.source_id, batch_id)
                .await?;
            counts = (counts.0 + batch_counts.0, counts.1 + batch_counts.1, counts.2 + batch_counts.2);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cif_catalog::InMemoryCatalog;
    use cif_connector::FilesystemConnector;
    use cif_time::MockProvider;
    use cif_types::{ConnectorConfig, DisaggregationMode};

    fn source(source_id: &str) -> Source {
        Source {
            source_id: source_id.to_string(),
            external_id: "e".to_string(),
            category: "docs".to_string(),
            created_on: Time::from_timestamp_micros(0),
            enabled: true,
            connector_config: ConnectorConfig::Filesystem { root: ".".to_string(), glob_pattern: "*".to_string() },
            extractor_configs: vec![],
            disaggregation_mode: DisaggregationMode::Immediate,
            retain_generations: 1,
        }
    }

    #[tokio::test]
    async fn intake_creates_a_generation_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.txt"));
        let time_provider: TimeProviderRef = Arc::new(MockProvider::new(Time::from_timestamp_micros(1_000_000)));

        let intake = Intake::new(catalog, connector, source("s1"), Arc::clone(&time_provider));
        let generation = intake.intake(None, None).await.unwrap();
        assert!(generation.is_some());
        assert_eq!(generation.unwrap().generation_id, 1_000_000);
    }

    #[tokio::test]
    async fn reintake_with_no_changes_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.txt"));
        let mock_provider = Arc::new(MockProvider::new(Time::from_timestamp_micros(1_000_000)));
        let time_provider: TimeProviderRef = Arc::<MockProvider>::clone(&mock_provider);

        let intake = Intake::new(Arc::clone(&catalog), Arc::clone(&connector), source("s1"), time_provider);
        let first = intake.intake(None, None).await.unwrap();
        assert!(first.is_some());

        mock_provider.inc(chrono::Duration::seconds(1));
        let second = intake.intake(None, None).await.unwrap();
        assert!(second.is_none());
    }
}
