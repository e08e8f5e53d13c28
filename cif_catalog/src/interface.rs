use async_trait::async_trait;
use cif_time::Time;
use cif_types::{
    Artifact, ArtifactChange, DeferredDisaggregation, DeferredDisaggregationSummary, Fingerprint,
    Fragment, FragmentKey, FragmentView, Generation, JsonSearchTerm, KeySearchTerm, Page,
    SearchFilter, Source,
};

use crate::Result;

/// One artifact observation awaiting promotion into `artifact`/`generation`,
/// as produced by a connector's `list_artifacts` and written by
/// [`Catalog::insert_stage_batch`].
#[derive(Debug, Clone)]
pub struct StageRow {
    pub stage_id: String,
    pub batch_id: i64,
    pub source_id: String,
    pub external_id: String,
    pub fingerprint: Fingerprint,
    pub created_on: Time,
    /// Provisional `artifact_id` assigned at staging time; reassigned to a
    /// pre-existing artifact's id by the promotion transaction's first pass
    /// if one matches on `(source_id, external_id, version)`.
    pub artifact_id: String,
}

/// Counts produced by one batch of [`Catalog::insert_artifact_generation_batch`]:
/// `(reconciled, newly_inserted, total_generation_members)`, mirroring the
/// three-pass promotion transaction's own row counts.
pub type PromotionCounts = (i64, i64, i64);

/// Parameters shared by every fragment-text search variant.
#[derive(Debug, Clone)]
pub struct TextSearchQuery {
    /// Used to build the `WHERE` predicate. Required for text search; for
    /// ngram search, at least one of `query`/`score_query` must be set.
    pub query: Option<String>,
    /// Used to build the relevance expression; defaults to `query` when
    /// absent.
    pub score_query: Option<String>,
    /// Selects `tsquery`/`ts_rank` (false) vs. trigram similarity (true).
    pub ngram: bool,
    pub filter: SearchFilter,
}

/// Data access methods for the CIF catalog: the system of record for
/// sources, staged observations, artifacts, generations, fragments and
/// fragment keys.
///
/// Implementations must provide the three-pass promotion transaction
/// (`insert_artifact_generation_batch`) atomically per batch: identity
/// reconciliation, then artifact materialization, then generation
/// materialization, in that order, within a single database transaction.
#[async_trait]
pub trait Catalog: std::fmt::Debug + Send + Sync {
    async fn get_latest_generation(&self, source_id: &str) -> Result<Option<Generation>>;

    /// Count staged rows for which no artifact with matching
    /// `(external_id, version)` exists in `generation_id` -- i.e. rows that
    /// are either brand new or updates of an existing `external_id`.
    async fn count_inserted_updated(
        &self,
        stage_id: &str,
        source_id: &str,
        generation_id: i64,
    ) -> Result<i64>;

    /// Count artifacts in `generation_id` for which no staged row with a
    /// matching `(external_id, version)` exists -- i.e. artifacts dropped
    /// from this intake.
    async fn count_deleted(&self, stage_id: &str, source_id: &str, generation_id: i64) -> Result<i64>;

    /// Insert one batch of staged observations. Returns the number of rows
    /// inserted.
    async fn insert_stage_batch(
        &self,
        stage_id: &str,
        source_id: &str,
        batch_id: i64,
        batch_artifacts: &[(String, Fingerprint)],
        created_on: Time,
    ) -> Result<usize>;

    /// Promote one staged batch into `artifact`/`generation` rows via the
    /// three-pass transaction. Returns `(reconciled, inserted, total)`.
    async fn insert_artifact_generation_batch(
        &self,
        stage_id: &str,
        source_id: &str,
        batch_id: i64,
    ) -> Result<PromotionCounts>;

    async fn get_sources(&self, limit: i64, offset: i64) -> Result<Page<Source>>;
    async fn get_source(&self, source_id: &str) -> Result<Option<Source>>;
    async fn get_sources_by_external_id_like(
        &self,
        external_id_pattern: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Source>>;

    async fn get_generations(&self, source_id: &str, limit: i64, offset: i64) -> Result<Page<Generation>>;
    async fn get_generation(&self, source_id: &str, generation_id: i64) -> Result<Option<Generation>>;

    async fn get_artifacts(
        &self,
        source_id: &str,
        generation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Artifact>>;
    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>>;

    /// Artifacts whose membership in `generation_id` was created at the same
    /// instant the artifact itself was created -- i.e. artifacts that are new
    /// as of this generation, the set disaggregation operates over.
    async fn get_new_artifacts(
        &self,
        source_id: &str,
        generation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Artifact>>;

    async fn diff_generations(
        &self,
        source_id: &str,
        generation_id_a: i64,
        generation_id_b: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<ArtifactChange>>;

    /// Upserts on `(artifact_id, fragment_id, seq_no)`; re-disaggregating a
    /// fragment replaces its content rather than duplicating the row.
    async fn insert_fragments(&self, fragments: &[Fragment]) -> Result<usize>;
    /// Upserts on `(artifact_id, fragment_id, seq_no, key, value)`.
    async fn insert_fragment_keys(&self, fragment_keys: &[FragmentKey]) -> Result<usize>;
    /// Upserts on `(source_id, generation_id, artifact_id, extractor_type,
    /// fragment_id, start_byte, end_byte)` -- the same task key is written
    /// PENDING at publish time and DONE/FAILED at delivery time, and both
    /// writes must land on one row (spec.md §4.6).
    async fn insert_deferred_disaggregations(
        &self,
        deferred_disaggregations: &[DeferredDisaggregation],
    ) -> Result<usize>;

    async fn search_fragments(
        &self,
        source_id: &str,
        search: TextSearchQuery,
        limit: i64,
        offset: i64,
    ) -> Result<Page<FragmentView>>;

    async fn search_fragments_json(
        &self,
        source_id: &str,
        terms: &[JsonSearchTerm],
        filter: SearchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<FragmentView>>;

    /// Search by fragment key. `source_id` must be 32 hex characters; see
    /// `DESIGN.md` Open Question 3 for why this one query path builds its
    /// `source_id` predicate by string substitution rather than binding.
    async fn search_fragments_key(
        &self,
        source_id: &str,
        terms: &[KeySearchTerm],
        filter: SearchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<FragmentView>>;

    async fn get_deferred_disaggregations_by_date_range(
        &self,
        created_on_start: Time,
        created_on_end: Option<Time>,
        source_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<DeferredDisaggregation>>;

    async fn deferred_disaggregation_summary(
        &self,
        created_on_start: Time,
        created_on_end: Option<Time>,
        source_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<DeferredDisaggregationSummary>>;
}
