//! Pulls deferred disaggregation messages off the work queue and drives each
//! to completion, classifying failures into a terminal discard or a
//! retryable nack per spec.md §4.6/§7.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

use std::sync::Arc;

use cif_catalog::Catalog;
use cif_disaggregation::Disaggregation;
use cif_queue::{Delivery, WorkQueue};
use cif_types::{DeferredDisaggregation, DisaggregationStatus, Error, Result, Source};
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::{info, warn};

/// Builds a [`Disaggregation`] for a resolved [`Source`].
///
/// Implemented by `cif_factory::Factory`; kept as a trait seam so
/// `cif_worker` never needs to know how connectors and extractors are
/// reified from configuration -- it only needs a configured `Disaggregation`
/// to run one fragment-extraction task against.
pub trait DisaggregationFactory: std::fmt::Debug + Send + Sync {
    fn new_disaggregation(&self, source: &Source) -> Disaggregation;
}

/// Drives the message-consumption side of disaggregation: receive, resolve,
/// extract, then report a terminal status and ack/nack.
#[derive(Debug)]
pub struct Worker {
    catalog: Arc<dyn Catalog>,
    queue: Arc<dyn WorkQueue>,
    factory: Arc<dyn DisaggregationFactory>,
    done: Arc<Metric<U64Counter>>,
    discarded: Arc<Metric<U64Counter>>,
    retried: Arc<Metric<U64Counter>>,
}

impl Worker {
    pub fn new(catalog: Arc<dyn Catalog>, queue: Arc<dyn WorkQueue>, factory: Arc<dyn DisaggregationFactory>, metrics: &Registry) -> Self {
        Self {
            catalog,
            queue,
            factory,
            done: metrics.register_counter("cif_worker_messages_done"),
            discarded: metrics.register_counter("cif_worker_messages_discarded"),
            retried: metrics.register_counter("cif_worker_messages_retried"),
        }
    }

    /// Pulls up to `max_messages` currently available deliveries and handles
    /// each to completion. Returns the number pulled (zero if none were
    /// available).
    pub async fn run_once(&self, max_messages: usize) -> Result<usize> {
        let deliveries = self.queue.receive(max_messages).await?;
        let count = deliveries.len();
        for delivery in deliveries {
            self.handle(delivery).await;
        }
        Ok(count)
    }

    /// Handles one delivery to completion. Never propagates an error: every
    /// failure is classified into a discard (ack) or a retry (nack) and
    /// recorded as a terminal `deferred_disaggregation` status, mirroring
    /// the original's `Worker.__call__` catch-all boundary.
    async fn handle(&self, delivery: Delivery) {
        let parsed = match cif_queue::decode(&delivery.payload) {
            Ok(message) => message,
            Err(source) => {
                warn!(error = %source, "discarding unparseable message");
                self.discarded.recorder([("reason", "unparseable")]).inc(1);
                let _ = self.queue.ack(delivery).await;
                return;
            }
        };

        let delivery_attempt = delivery.delivery_attempt;
        match self.process(&parsed).await {
            Ok(()) => {
                self.mark(&parsed, delivery_attempt, DisaggregationStatus::Done).await;
                self.done.recorder([("source_id", parsed.source_id.as_str())]).inc(1);
                let _ = self.queue.ack(delivery).await;
            }
            Err(err) if err.is_retryable() => {
                warn!(
                    error = %err,
                    source_id = %parsed.source_id,
                    artifact_id = %parsed.artifact_id,
                    "retrying disaggregation after transient failure"
                );
                self.mark(&parsed, delivery_attempt, DisaggregationStatus::Failed).await;
                self.retried.recorder([("source_id", parsed.source_id.as_str())]).inc(1);
                let _ = self.queue.nack(delivery).await;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    source_id = %parsed.source_id,
                    artifact_id = %parsed.artifact_id,
                    "discarding disaggregation"
                );
                self.mark(&parsed, delivery_attempt, DisaggregationStatus::Failed).await;
                self.discarded.recorder([("source_id", parsed.source_id.as_str())]).inc(1);
                let _ = self.queue.ack(delivery).await;
            }
        }
    }

    /// Resolves every object the message references, runs the named
    /// extractor, and returns the classified [`cif_types::Error`] on any
    /// failure: `NotFound` for an unresolvable reference or extractor (per
    /// the original's `check_references`/`check_extractor`), whatever
    /// `Disaggregation::disaggregate_one` itself surfaces otherwise.
    async fn process(&self, parsed: &DeferredDisaggregation) -> Result<()> {
        let source = self
            .catalog
            .get_source(&parsed.source_id)
            .await?
            .ok_or_else(|| Error::not_found("source", parsed.source_id.clone()))?;
        let generation = self
            .catalog
            .get_generation(&parsed.source_id, parsed.generation_id)
            .await?
            .ok_or_else(|| Error::not_found("generation", parsed.generation_id.to_string()))?;
        let artifact = self
            .catalog
            .get_artifact(&parsed.artifact_id)
            .await?
            .ok_or_else(|| Error::not_found("artifact", parsed.artifact_id.clone()))?;

        let disaggregation = self.factory.new_disaggregation(&source);
        let extractor = disaggregation
            .extractor(&parsed.extractor_type)
            .ok_or_else(|| Error::not_found("extractor_type", parsed.extractor_type.clone()))?
            .clone();

        disaggregation
            .disaggregate_one(
                &artifact,
                &parsed.extractor_type,
                extractor.as_ref(),
                parsed.fragment_id.as_deref(),
                parsed.start_byte,
                parsed.end_byte,
            )
            .await?;

        info!(
            source_id = %source.source_id,
            generation_id = generation.generation_id,
            artifact_id = %artifact.artifact_id,
            "processed disaggregation"
        );
        Ok(())
    }

    /// Persists a terminal status for this message, carrying forward the
    /// delivery attempt the bus reports (defaulting to 1 on first delivery).
    async fn mark(&self, parsed: &DeferredDisaggregation, delivery_attempt: i32, status: DisaggregationStatus) {
        let mut message = parsed.clone();
        message.delivery_attempt = if delivery_attempt > 0 { delivery_attempt } else { 1 };
        message.status = status;
        if let Err(err) = self.catalog.insert_deferred_disaggregations(std::slice::from_ref(&message)).await {
            warn!(error = %err, source_id = %message.source_id, artifact_id = %message.artifact_id, "failed to persist deferred disaggregation status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cif_catalog::InMemoryCatalog;
    use cif_connector::FilesystemConnector;
    use cif_extractor::HtmlExtractor;
    use cif_queue::InMemoryWorkQueue;
    use cif_time::Time;
    use cif_types::{ConnectorConfig, DisaggregationMode, Fingerprint, KeyRuleTable};

    #[derive(Debug)]
    struct StaticFactory {
        catalog: Arc<dyn Catalog>,
        connector: Arc<dyn cif_connector::Connector>,
        queue: Arc<dyn WorkQueue>,
        metrics: Registry,
    }

    impl DisaggregationFactory for StaticFactory {
        fn new_disaggregation(&self, source: &Source) -> Disaggregation {
            let extractor: Arc<dyn cif_extractor::Extractor> = Arc::new(HtmlExtractor::new(Arc::clone(&self.connector), None));
            Disaggregation::new(
                Arc::clone(&self.catalog),
                Arc::clone(&self.connector),
                Arc::clone(&self.queue),
                source.clone(),
                vec![("HTMLExtractor".to_string(), extractor)],
                KeyRuleTable::new(),
                &self.metrics,
            )
        }
    }

    fn source() -> Source {
        Source {
            source_id: "s1".to_string(),
            external_id: "e".to_string(),
            category: "docs".to_string(),
            created_on: Time::from_timestamp_micros(0),
            enabled: true,
            connector_config: ConnectorConfig::Filesystem { root: ".".to_string(), glob_pattern: "*".to_string() },
            extractor_configs: vec![],
            disaggregation_mode: DisaggregationMode::Deferred,
            retain_generations: 1,
        }
    }

    async fn seed(catalog: &InMemoryCatalog) -> (Source, cif_types::Generation, cif_types::Artifact) {
        catalog.put_source(source());
        let created_on = Time::from_timestamp_micros(1_000_000);
        catalog
            .insert_stage_batch(
                "stage-1",
                "s1",
                0,
                &[("a.html".to_string(), Fingerprint { content_type: "text/html".into(), content_length: 5, version: "v1".into() })],
                created_on,
            )
            .await
            .unwrap();
        catalog.insert_artifact_generation_batch("stage-1", "s1", 0).await.unwrap();
        let generation = catalog.get_latest_generation("s1").await.unwrap().unwrap();
        let artifact = catalog.get_artifact(&generation.artifact_id).await.unwrap().unwrap();
        (source(), generation, artifact)
    }

    #[tokio::test]
    async fn discards_unparseable_message() {
        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let queue = Arc::new(InMemoryWorkQueue::new());
        let dir = tempfile::tempdir().unwrap();
        let connector: Arc<dyn cif_connector::Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.html"));
        let factory = Arc::new(StaticFactory { catalog: Arc::clone(&catalog), connector, queue: Arc::clone(&queue) as Arc<dyn WorkQueue>, metrics: Registry::new() });
        let worker = Worker::new(Arc::clone(&catalog), Arc::clone(&queue) as Arc<dyn WorkQueue>, factory, &Registry::new());

        queue.publish(vec![b"not json".to_vec()]).await.unwrap();
        let pulled = worker.run_once(10).await.unwrap();
        assert_eq!(pulled, 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn processes_a_deferred_disaggregation_end_to_end() {
        let in_memory_catalog = InMemoryCatalog::new();
        let (_source, generation, artifact) = seed(&in_memory_catalog).await;
        let catalog: Arc<dyn Catalog> = Arc::new(in_memory_catalog);
        let queue = Arc::new(InMemoryWorkQueue::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.html"), b"<html><body>Hello</body></html>").unwrap();
        let connector: Arc<dyn cif_connector::Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.html"));

        let message = DeferredDisaggregation {
            source_id: "s1".to_string(),
            generation_id: generation.generation_id,
            artifact_id: artifact.artifact_id.clone(),
            extractor_type: "HTMLExtractor".to_string(),
            fragment_id: None,
            start_byte: None,
            end_byte: None,
            created_on: generation.created_on,
            status: DisaggregationStatus::Pending,
            delivery_attempt: 0,
        };
        queue.publish(vec![cif_queue::encode(&message).unwrap()]).await.unwrap();

        let factory = Arc::new(StaticFactory { catalog: Arc::clone(&catalog), connector, queue: Arc::clone(&queue) as Arc<dyn WorkQueue>, metrics: Registry::new() });
        let worker = Worker::new(Arc::clone(&catalog), Arc::clone(&queue) as Arc<dyn WorkQueue>, factory, &Registry::new());

        let pulled = worker.run_once(10).await.unwrap();
        assert_eq!(pulled, 1);
        assert_eq!(queue.pending_len(), 0);

        let deferred = catalog
            .get_deferred_disaggregations_by_date_range(generation.created_on, None, Some("s1"), 10, 0)
            .await
            .unwrap();
        assert_eq!(deferred.records.len(), 1);
        assert_eq!(deferred.records[0].status, DisaggregationStatus::Done);
    }

    #[tokio::test]
    async fn discards_message_referencing_unknown_artifact() {
        let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
        let queue = Arc::new(InMemoryWorkQueue::new());
        let dir = tempfile::tempdir().unwrap();
        let connector: Arc<dyn cif_connector::Connector> = Arc::new(FilesystemConnector::new(dir.path(), "*.html"));

        let message = DeferredDisaggregation {
            source_id: "s1".to_string(),
            generation_id: 1,
            artifact_id: "missing".to_string(),
            extractor_type: "HTMLExtractor".to_string(),
            fragment_id: None,
            start_byte: None,
            end_byte: None,
            created_on: Time::from_timestamp_micros(0),
            status: DisaggregationStatus::Pending,
            delivery_attempt: 0,
        };
        queue.publish(vec![cif_queue::encode(&message).unwrap()]).await.unwrap();

        let factory = Arc::new(StaticFactory { catalog: Arc::clone(&catalog), connector, queue: Arc::clone(&queue) as Arc<dyn WorkQueue>, metrics: Registry::new() });
        let worker = Worker::new(Arc::clone(&catalog), Arc::clone(&queue) as Arc<dyn WorkQueue>, factory, &Registry::new());

        let pulled = worker.run_once(10).await.unwrap();
        assert_eq!(pulled, 1);
        assert_eq!(queue.pending_len(), 0, "NotFound failures discard rather than retry");
    }
}
