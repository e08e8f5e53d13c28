//! Drives fragment extraction for a generation's new artifacts via one of
//! four dispatch modes (spec.md §4.5): immediate, immediate-chunked,
//! deferred, deferred-chunked.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

mod error;
mod limits;

pub use error::{Error, Result};
pub use limits::{
    CHUNK_WORKER_POOL_SIZE, DEFAULT_LINES_PER_CHUNK, DEFAULT_PAGE_LIMIT, DEFERRED_PERSIST_BATCH_SIZE,
    FRAGMENT_INSERT_BATCH_SIZE, FRAGMENT_KEY_INSERT_BATCH_SIZE,
};

use std::sync::Arc;

use cif_catalog::Catalog;
use cif_connector::Connector;
use cif_extractor::Extractor;
use cif_queue::WorkQueue;
use cif_types::{
    Artifact, DeferredDisaggregation, DisaggregationMode, DisaggregationStatus, FragmentKey, Generation, KeyRuleTable,
    Source,
};
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::info;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// One configured `(extractor_type, Extractor)` pair, as reified by the
/// Factory from a [`Source`]'s `extractor_configs`.
pub type NamedExtractor = (String, Arc<dyn Extractor>);

/// Orchestrates fragment extraction for one [`Source`]'s new artifacts.
///
/// Cheaply [`Clone`]: every field is an `Arc` or small owned value, so that
/// `IMMEDIATE_CHUNKED` dispatch can hand each worker-pool task its own
/// handle without threading lifetimes through `tokio::spawn`.
#[derive(Debug, Clone)]
pub struct Disaggregation {
    catalog: Arc<dyn Catalog>,
    connector: Arc<dyn Connector>,
    queue: Arc<dyn WorkQueue>,
    source: Source,
    extractors: Arc<Vec<NamedExtractor>>,
    key_rules: Arc<KeyRuleTable>,
    fragments_inserted: Arc<Metric<U64Counter>>,
    fragment_keys_inserted: Arc<Metric<U64Counter>>,
}

impl Disaggregation {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        connector: Arc<dyn Connector>,
        queue: Arc<dyn WorkQueue>,
        source: Source,
        extractors: Vec<NamedExtractor>,
        key_rules: KeyRuleTable,
        metrics: &Registry,
    ) -> Self {
        Self {
            catalog,
            connector,
            queue,
            source,
            extractors: Arc::new(extractors),
            key_rules: Arc::new(key_rules),
            fragments_inserted: metrics.register_counter("cif_fragments_inserted"),
            fragment_keys_inserted: metrics.register_counter("cif_fragment_keys_inserted"),
        }
    }

    /// The extractors configured for this source, by `extractor_type`. Used
    /// by `cif_worker` to resolve the extractor named in a deferred message.
    pub fn extractor(&self, extractor_type: &str) -> Option<&Arc<dyn Extractor>> {
        self.extractors.iter().find(|(t, _)| t == extractor_type).map(|(_, e)| e)
    }

    /// Disaggregates every new artifact of `generation` per this source's
    /// configured [`DisaggregationMode`]. Returns the number of
    /// artifact/extractor (or artifact/chunk/extractor) combinations
    /// processed or scheduled.
    pub async fn disaggregate(&self, generation: &Generation) -> Result<usize> {
        info!(
            source_id = %self.source.source_id,
            generation_id = generation.generation_id,
            "starting disaggregation"
        );
        let mut offset = Some(0i64);
        let mut count = 0usize;
        while let Some(current_offset) = offset {
            let page = self
                .catalog
                .get_new_artifacts(&self.source.source_id, generation.generation_id, DEFAULT_PAGE_LIMIT, current_offset)
                .await
                .context(CatalogSnafu)?;
            offset = page.next_offset;

            count += match self.source.disaggregation_mode {
                DisaggregationMode::Deferred => self.defer_all(generation, &page.records).await?,
                DisaggregationMode::DeferredChunked => {
                    self.defer_and_chunk_all(generation, &page.records, DEFAULT_LINES_PER_CHUNK).await?
                }
                DisaggregationMode::ImmediateChunked => {
                    self.disaggregate_and_chunk_all(generation, &page.records, DEFAULT_LINES_PER_CHUNK).await?
                }
                DisaggregationMode::Immediate => self.disaggregate_all(&page.records).await?,
            };
        }
        info!(
            source_id = %self.source.source_id,
            generation_id = generation.generation_id,
            count,
            "finished disaggregation"
        );
        Ok(count)
    }

    /// Runs every configured extractor on every artifact, serially, in the
    /// current process.
    async fn disaggregate_all(&self, artifacts: &[Artifact]) -> Result<usize> {
        let mut count = 0;
        for artifact in artifacts {
            for (extractor_type, extractor) in self.extractors.iter() {
                count += self.disaggregate_one(artifact, extractor_type, extractor.as_ref(), None, None, None).await?;
            }
        }
        Ok(count)
    }

    /// Extracts fragments for one artifact/extractor (optionally chunked)
    /// combination: runs the extractor, then persists its fragments and
    /// fragment keys in mutation-capped batches. Returns 1 on success.
    pub async fn disaggregate_one(
        &self,
        artifact: &Artifact,
        extractor_type: &str,
        extractor: &dyn Extractor,
        fragment_id: Option<&str>,
        start_byte: Option<i64>,
        end_byte: Option<i64>,
    ) -> Result<usize> {
        let fragments = extractor.calc_fragments(artifact, fragment_id, start_byte, end_byte).await.context(ExtractorSnafu)?;
        info!(count = fragments.len(), artifact_id = %artifact.artifact_id, extractor_type, "extracted fragments");

        let mut rows = 0;
        for batch in fragments.chunks(FRAGMENT_INSERT_BATCH_SIZE) {
            rows += self.catalog.insert_fragments(batch).await.context(CatalogSnafu)?;
        }
        info!(rows, source_id = %self.source.source_id, "inserted fragments");
        self.fragments_inserted.recorder([("source_id", self.source.source_id.as_str())]).inc(rows as u64);

        let fragment_keys: Vec<FragmentKey> = fragments
            .iter()
            .flat_map(|fragment| cif_extractor::keys::calc_fragment_keys(&self.key_rules, artifact, fragment))
            .collect();
        let mut key_rows = 0;
        for batch in fragment_keys.chunks(FRAGMENT_KEY_INSERT_BATCH_SIZE) {
            key_rows += self.catalog.insert_fragment_keys(batch).await.context(CatalogSnafu)?;
        }
        info!(key_rows, source_id = %self.source.source_id, "inserted fragment keys");
        self.fragment_keys_inserted.recorder([("source_id", self.source.source_id.as_str())]).inc(key_rows as u64);

        Ok(1)
    }

    /// Splits each artifact into line-bounded chunks and runs every
    /// extractor on every chunk, concurrently, bounded by a fixed-size
    /// worker pool.
    async fn disaggregate_and_chunk_all(&self, generation: &Generation, artifacts: &[Artifact], lines_per_chunk: usize) -> Result<usize> {
        let semaphore = Arc::new(Semaphore::new(CHUNK_WORKER_POOL_SIZE));
        let mut handles = Vec::new();

        for artifact in artifacts {
            info!(
                artifact_id = %artifact.artifact_id,
                content_length = artifact.content_length,
                "splitting large artifact into chunks"
            );
            let chunks = self.connector.calc_line_chunks(&artifact.external_id, lines_per_chunk).await.context(ConnectorSnafu)?;
            for (start_byte, end_byte) in chunks {
                for (extractor_type, extractor) in self.extractors.iter() {
                    let fragment_id = Uuid::new_v4().simple().to_string();
                    let this = self.clone();
                    let artifact = artifact.clone();
                    let extractor_type = extractor_type.clone();
                    let extractor = Arc::clone(extractor);
                    let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore is never closed");
                    handles.push(tokio::spawn(async move {
                        let _permit = permit;
                        this.disaggregate_one(&artifact, &extractor_type, extractor.as_ref(), Some(&fragment_id), Some(start_byte), Some(end_byte))
                            .await
                    }));
                }
            }
        }

        let mut count = 0;
        for handle in handles {
            count += handle.await.context(JoinSnafu)??;
        }
        info!(
            source_id = %self.source.source_id,
            generation_id = generation.generation_id,
            count,
            "processed chunked disaggregations"
        );
        Ok(count)
    }

    /// Schedules one `DeferredDisaggregation` per artifact/extractor
    /// combination, for the whole artifact.
    async fn defer_all(&self, generation: &Generation, artifacts: &[Artifact]) -> Result<usize> {
        let messages: Vec<DeferredDisaggregation> = artifacts
            .iter()
            .flat_map(|artifact| {
                self.extractors.iter().map(move |(extractor_type, _)| DeferredDisaggregation {
                    source_id: self.source.source_id.clone(),
                    generation_id: generation.generation_id,
                    artifact_id: artifact.artifact_id.clone(),
                    extractor_type: extractor_type.clone(),
                    fragment_id: None,
                    start_byte: None,
                    end_byte: None,
                    created_on: generation.created_on,
                    status: DisaggregationStatus::Pending,
                    delivery_attempt: 0,
                })
            })
            .collect();
        self.persist_and_publish(messages).await
    }

    /// Schedules one `DeferredDisaggregation` per artifact/chunk/extractor
    /// combination, each carrying its own byte range and fragment_id.
    async fn defer_and_chunk_all(&self, generation: &Generation, artifacts: &[Artifact], lines_per_chunk: usize) -> Result<usize> {
        let mut messages = Vec::new();
        for artifact in artifacts {
            info!(
                artifact_id = %artifact.artifact_id,
                content_length = artifact.content_length,
                "splitting large artifact into chunks"
            );
            let chunks = self.connector.calc_line_chunks(&artifact.external_id, lines_per_chunk).await.context(ConnectorSnafu)?;
            for (start_byte, end_byte) in chunks {
                for (extractor_type, _) in self.extractors.iter() {
                    messages.push(DeferredDisaggregation {
                        source_id: self.source.source_id.clone(),
                        generation_id: generation.generation_id,
                        artifact_id: artifact.artifact_id.clone(),
                        extractor_type: extractor_type.clone(),
                        fragment_id: Some(Uuid::new_v4().simple().to_string()),
                        start_byte: Some(start_byte),
                        end_byte: Some(end_byte),
                        created_on: generation.created_on,
                        status: DisaggregationStatus::Pending,
                        delivery_attempt: 0,
                    });
                }
            }
        }
        self.persist_and_publish(messages).await
    }

    /// Persists every message to `deferred_disaggregation` (in chunks of
    /// [`DEFERRED_PERSIST_BATCH_SIZE`]) before publishing any of them, so
    /// that a publish failure never loses the row: it stays PENDING and is
    /// reconciled by operational retry. If persistence fails, publish is
    /// never attempted.
    async fn persist_and_publish(&self, messages: Vec<DeferredDisaggregation>) -> Result<usize> {
        for batch in messages.chunks(DEFERRED_PERSIST_BATCH_SIZE) {
            self.catalog.insert_deferred_disaggregations(batch).await.context(CatalogSnafu)?;
        }

        let mut payloads = Vec::with_capacity(messages.len());
        for message in &messages {
            payloads.push(cif_queue::encode(message).context(QueueSnafu)?);
        }
        self.queue.publish(payloads).await.context(QueueSnafu)?;

        info!(count = messages.len(), source_id = %self.source.source_id, "persisted and published deferred disaggregations");
        Ok(messages.len())
    }
}

use error::{CatalogSnafu, ConnectorSnafu, ExtractorSnafu, JoinSnafu, QueueSnafu};
use snafu::ResultExt;

#[cfg(test)]
mod tests {
    use super::*;
    use cif_catalog::InMemoryCatalog;
    use cif_connector::FilesystemConnector;
    use cif_extractor::HtmlExtractor;
    use cif_queue::InMemoryWorkQueue;
    use cif_types::ConnectorConfig;

    fn source(mode: DisaggregationMode) -> Source {
        Source {
            source_id: "s1".to_string(),
            external_id: "e".to_string(),
            category: "docs".to_string(),
            created_on: cif_time::Time::from_timestamp_micros(0),
            enabled: true,
            connector_config: ConnectorConfig::Filesystem { root: ".".to_string(), glob_pattern: "*".to_string() },
            extractor_configs: vec![],
            disaggregation_mode: mode,
            retain_generations: 1,
        }
    }

    #[tokio::test]
    async fn immediate_mode_extracts_and_inserts_fragments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), b"<html><body>Hello</body></html>").unwrap();

        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.html"));
        let queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());
        let extractor: Arc<dyn Extractor> = Arc::new(HtmlExtractor::new(Arc::clone(&connector), None));

        let generation = seed_generation_for(&catalog, "a.html").await;
        let metrics = Registry::new();

        let disaggregation = Disaggregation::new(
            Arc::clone(&catalog),
            connector,
            queue,
            source(DisaggregationMode::Immediate),
            vec![("HTMLExtractor".to_string(), extractor)],
            KeyRuleTable::new(),
            &metrics,
        );

        let count = disaggregation.disaggregate(&generation).await.unwrap();
        assert_eq!(count, 1);
    }

    async fn seed_generation_for(catalog: &Arc<dyn Catalog>, external_id: &str) -> Generation {
        let created_on = cif_time::Time::from_timestamp_micros(1_000_000);
        catalog
            .insert_stage_batch(
                "stage-1",
                "s1",
                0,
                &[(external_id.to_string(), cif_types::Fingerprint { content_type: "text/html".into(), content_length: 5, version: "v1".into() })],
                created_on,
            )
            .await
            .unwrap();
        catalog.insert_artifact_generation_batch("stage-1", "s1", 0).await.unwrap();
        catalog.get_latest_generation("s1").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn deferred_mode_persists_then_publishes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), b"<html><body>Hello</body></html>").unwrap();

        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.html"));
        let queue = Arc::new(InMemoryWorkQueue::new());
        let extractor: Arc<dyn Extractor> = Arc::new(HtmlExtractor::new(Arc::clone(&connector), None));

        let generation = seed_generation_for(&catalog, "a.html").await;
        let metrics = Registry::new();

        let disaggregation = Disaggregation::new(
            Arc::clone(&catalog),
            connector,
            Arc::clone(&queue) as Arc<dyn WorkQueue>,
            source(DisaggregationMode::Deferred),
            vec![("HTMLExtractor".to_string(), extractor)],
            KeyRuleTable::new(),
            &metrics,
        );

        let count = disaggregation.disaggregate(&generation).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(queue.pending_len(), 1);

        let deferred = catalog
            .get_deferred_disaggregations_by_date_range(generation.created_on, None, Some("s1"), 10, 0)
            .await
            .unwrap();
        assert_eq!(deferred.records.len(), 1);
        assert_eq!(deferred.records[0].status, DisaggregationStatus::Pending);
    }

    #[tokio::test]
    async fn immediate_chunked_mode_splits_and_bounds_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rows.csv"), b"name,age\na,1\nb,2\nc,3\nd,4\n").unwrap();

        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let connector: Arc<dyn Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.csv"));
        let queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());
        let extractor: Arc<dyn Extractor> = Arc::new(cif_extractor::CsvRowExtractor::new(Arc::clone(&connector), None));

        let generation = seed_generation_for(&catalog, "rows.csv").await;
        let metrics = Registry::new();

        let disaggregation = Disaggregation::new(
            Arc::clone(&catalog),
            connector,
            queue,
            source(DisaggregationMode::ImmediateChunked),
            vec![("CSVRowExtractor".to_string(), extractor)],
            KeyRuleTable::new(),
            &metrics,
        );

        let count = disaggregation.disaggregate(&generation).await.unwrap();
        assert_eq!(count, 1);
    }
}
