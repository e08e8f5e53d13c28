//! An in-memory [`Catalog`] implementation.
//!
//! Used as the backing store for unit tests across the workspace, and as a
//! lightweight embedded mode where a real Postgres instance isn't available.
//! Query semantics mirror [`crate::postgres::PostgresCatalog`] closely enough
//! that a test written against one behaves the same against the other, but
//! full-text relevance scoring here is a substring match rather than a real
//! ranking function -- see `search_fragments` below.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use cif_time::Time;
use cif_types::{
    AggregationLevel, Artifact, ArtifactChange, ChangeKind, DeferredDisaggregation,
    DeferredDisaggregationSummary, DisaggregationStatus, Fingerprint, Fragment, FragmentKey,
    FragmentView, Generation, JsonSearchTerm, KeySearchTerm, Page, SearchFilter, Source,
};
use parking_lot::Mutex;

use crate::error::InvalidSourceIdSnafu;
use crate::interface::{Catalog, PromotionCounts, StageRow, TextSearchQuery};
use crate::Result;
use snafu::ensure;

#[derive(Debug, Default)]
struct State {
    sources: HashMap<String, Source>,
    stage: Vec<StageRow>,
    artifacts: HashMap<String, Artifact>,
    artifact_index: HashMap<(String, String, String), String>,
    generations: Vec<Generation>,
    fragments: Vec<Fragment>,
    fragment_keys: Vec<FragmentKey>,
    deferred_disaggregations: Vec<DeferredDisaggregation>,
}

/// An in-memory, single-process [`Catalog`].
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the catalog with a `Source` as though it had already been
    /// registered out of band.
    pub fn put_source(&self, source: Source) {
        self.state.lock().sources.insert(source.source_id.clone(), source);
    }

    fn members_of(state: &State, source_id: &str, generation_id: i64) -> Vec<String> {
        state
            .generations
            .iter()
            .filter(|g| g.source_id == source_id && g.generation_id == generation_id)
            .map(|g| g.artifact_id.clone())
            .collect()
    }

    fn latest_generation_id(state: &State, source_id: &str) -> Option<i64> {
        state
            .generations
            .iter()
            .filter(|g| g.source_id == source_id)
            .map(|g| g.generation_id)
            .max()
    }
}

/// Minimal SQL `LIKE` matcher (`%` = any run of characters, `_` = any single
/// character), sufficient for the small external_id prefix/suffix patterns
/// this catalog's search uses.
fn sql_like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    fn matches(value: &[char], pattern: &[char]) -> bool {
        match pattern.first() {
            None => value.is_empty(),
            Some('%') => {
                matches(value, &pattern[1..])
                    || (!value.is_empty() && matches(&value[1..], pattern))
            }
            Some('_') => !value.is_empty() && matches(&value[1..], &pattern[1..]),
            Some(c) => value.first() == Some(c) && matches(&value[1..], &pattern[1..]),
        }
    }

    matches(&value, &pattern)
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_latest_generation(&self, source_id: &str) -> Result<Option<Generation>> {
        let state = self.state.lock();
        let Some(generation_id) = Self::latest_generation_id(&state, source_id) else {
            return Ok(None);
        };
        Ok(state
            .generations
            .iter()
            .find(|g| g.source_id == source_id && g.generation_id == generation_id)
            .cloned())
    }

    async fn count_inserted_updated(
        &self,
        stage_id: &str,
        source_id: &str,
        generation_id: i64,
    ) -> Result<i64> {
        let state = self.state.lock();
        let existing: HashSet<(String, String)> = Self::members_of(&state, source_id, generation_id)
            .into_iter()
            .filter_map(|artifact_id| state.artifacts.get(&artifact_id))
            .map(|a| (a.external_id.clone(), a.version.clone()))
            .collect();
        let count = state
            .stage
            .iter()
            .filter(|s| s.stage_id == stage_id && s.source_id == source_id)
            .filter(|s| !existing.contains(&(s.external_id.clone(), s.fingerprint.version.clone())))
            .count();
        Ok(count as i64)
    }

    async fn count_deleted(&self, stage_id: &str, source_id: &str, generation_id: i64) -> Result<i64> {
        let state = self.state.lock();
        let staged: HashSet<(String, String)> = state
            .stage
            .iter()
            .filter(|s| s.stage_id == stage_id && s.source_id == source_id)
            .map(|s| (s.external_id.clone(), s.fingerprint.version.clone()))
            .collect();
        let count = Self::members_of(&state, source_id, generation_id)
            .into_iter()
            .filter_map(|artifact_id| state.artifacts.get(&artifact_id))
            .filter(|a| !staged.contains(&(a.external_id.clone(), a.version.clone())))
            .count();
        Ok(count as i64)
    }

    async fn insert_stage_batch(
        &self,
        stage_id: &str,
        source_id: &str,
        batch_id: i64,
        batch_artifacts: &[(String, Fingerprint)],
        created_on: Time,
    ) -> Result<usize> {
        let mut state = self.state.lock();
        let mut inserted = 0;
        for (external_id, fingerprint) in batch_artifacts {
            state.stage.push(StageRow {
                stage_id: stage_id.to_string(),
                batch_id,
                source_id: source_id.to_string(),
                external_id: external_id.clone(),
                fingerprint: fingerprint.clone(),
                created_on,
                artifact_id: uuid::Uuid::new_v4().simple().to_string(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_artifact_generation_batch(
        &self,
        stage_id: &str,
        source_id: &str,
        batch_id: i64,
    ) -> Result<PromotionCounts> {
        let mut state = self.state.lock();
        let indices: Vec<usize> = state
            .stage
            .iter()
            .enumerate()
            .filter(|(_, s)| s.stage_id == stage_id && s.source_id == source_id && s.batch_id == batch_id)
            .map(|(i, _)| i)
            .collect();

        // Pass 1: reconcile against any pre-existing artifact.
        let mut reconciled = 0i64;
        for &i in &indices {
            let key = (
                state.stage[i].source_id.clone(),
                state.stage[i].external_id.clone(),
                state.stage[i].fingerprint.version.clone(),
            );
            if let Some(existing_id) = state.artifact_index.get(&key).cloned() {
                state.stage[i].artifact_id = existing_id;
                reconciled += 1;
            }
        }

        // Pass 2: insert any artifact not already known.
        let mut inserted = 0i64;
        for &i in &indices {
            let row = state.stage[i].clone();
            if !state.artifacts.contains_key(&row.artifact_id) {
                state.artifacts.insert(
                    row.artifact_id.clone(),
                    Artifact {
                        source_id: row.source_id.clone(),
                        artifact_id: row.artifact_id.clone(),
                        external_id: row.external_id.clone(),
                        version: row.fingerprint.version.clone(),
                        content_type: row.fingerprint.content_type.clone(),
                        content_length: row.fingerprint.content_length,
                        created_on: row.created_on,
                    },
                );
                state.artifact_index.insert(
                    (row.source_id.clone(), row.external_id.clone(), row.fingerprint.version.clone()),
                    row.artifact_id.clone(),
                );
                inserted += 1;
            }
        }

        // Pass 3: materialize generation membership for every row in the batch.
        let mut total = 0i64;
        for &i in &indices {
            let row = state.stage[i].clone();
            state.generations.push(Generation {
                source_id: row.source_id,
                generation_id: row.created_on.timestamp_micros(),
                artifact_id: row.artifact_id,
                created_on: row.created_on,
            });
            total += 1;
        }

        Ok((reconciled, inserted, total))
    }

    async fn get_sources(&self, limit: i64, offset: i64) -> Result<Page<Source>> {
        let state = self.state.lock();
        let mut sources: Vec<Source> = state.sources.values().cloned().collect();
        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(paginate(sources, limit, offset))
    }

    async fn get_source(&self, source_id: &str) -> Result<Option<Source>> {
        Ok(self.state.lock().sources.get(source_id).cloned())
    }

    async fn get_sources_by_external_id_like(
        &self,
        external_id_pattern: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Source>> {
        let state = self.state.lock();
        let mut sources: Vec<Source> = state
            .sources
            .values()
            .filter(|s| sql_like_match(&s.external_id, external_id_pattern))
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(paginate(sources, limit, offset))
    }

    async fn get_generations(&self, source_id: &str, limit: i64, offset: i64) -> Result<Page<Generation>> {
        let state = self.state.lock();
        let mut by_id: HashMap<i64, Generation> = HashMap::new();
        for g in state.generations.iter().filter(|g| g.source_id == source_id) {
            by_id.entry(g.generation_id).or_insert_with(|| g.clone());
        }
        let mut generations: Vec<Generation> = by_id.into_values().collect();
        generations.sort_by(|a, b| b.generation_id.cmp(&a.generation_id));
        Ok(paginate(generations, limit, offset))
    }

    async fn get_generation(&self, source_id: &str, generation_id: i64) -> Result<Option<Generation>> {
        Ok(self
            .state
            .lock()
            .generations
            .iter()
            .find(|g| g.source_id == source_id && g.generation_id == generation_id)
            .cloned())
    }

    async fn get_artifacts(
        &self,
        source_id: &str,
        generation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Artifact>> {
        let state = self.state.lock();
        let mut artifacts: Vec<Artifact> = Self::members_of(&state, source_id, generation_id)
            .into_iter()
            .filter_map(|id| state.artifacts.get(&id).cloned())
            .collect();
        artifacts.sort_by(|a, b| a.artifact_id.cmp(&b.artifact_id));
        Ok(paginate(artifacts, limit, offset))
    }

    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>> {
        Ok(self.state.lock().artifacts.get(artifact_id).cloned())
    }

    async fn get_new_artifacts(
        &self,
        source_id: &str,
        generation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Artifact>> {
        let state = self.state.lock();
        let mut artifacts: Vec<Artifact> = state
            .generations
            .iter()
            .filter(|g| g.source_id == source_id && g.generation_id == generation_id)
            .filter_map(|g| {
                state
                    .artifacts
                    .get(&g.artifact_id)
                    .filter(|a| a.created_on == g.created_on)
                    .cloned()
            })
            .collect();
        artifacts.sort_by(|a, b| a.artifact_id.cmp(&b.artifact_id));
        Ok(paginate(artifacts, limit, offset))
    }

    async fn diff_generations(
        &self,
        source_id: &str,
        generation_id_a: i64,
        generation_id_b: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<ArtifactChange>> {
        let state = self.state.lock();
        let side = |generation_id: i64| -> HashMap<String, String> {
            state
                .generations
                .iter()
                .filter(|g| g.source_id == source_id && g.generation_id == generation_id)
                .filter_map(|g| {
                    state
                        .artifacts
                        .get(&g.artifact_id)
                        .map(|a| (a.external_id.clone(), a.artifact_id.clone()))
                })
                .collect()
        };
        let a = side(generation_id_a);
        let b = side(generation_id_b);
        let mut external_ids: Vec<String> = a.keys().chain(b.keys()).cloned().collect();
        external_ids.sort();
        external_ids.dedup();

        let changes = external_ids
            .into_iter()
            .map(|external_id| {
                let artifact_id_a = a.get(&external_id).cloned();
                let artifact_id_b = b.get(&external_id).cloned();
                let change = match (&artifact_id_a, &artifact_id_b) {
                    (None, Some(_)) => ChangeKind::Inserted,
                    (Some(_), None) => ChangeKind::Deleted,
                    (Some(x), Some(y)) if x != y => ChangeKind::Updated,
                    _ => ChangeKind::Unchanged,
                };
                ArtifactChange { external_id, artifact_id_a, artifact_id_b, change }
            })
            .collect();
        Ok(paginate(changes, limit, offset))
    }

    async fn insert_fragments(&self, fragments: &[Fragment]) -> Result<usize> {
        let mut state = self.state.lock();
        for f in fragments {
            let key = (f.artifact_id.clone(), f.fragment_id.clone(), f.seq_no);
            state.fragments.retain(|existing| (&existing.artifact_id, &existing.fragment_id, existing.seq_no) != (&key.0, &key.1, key.2));
            state.fragments.push(f.clone());
        }
        Ok(fragments.len())
    }

    async fn insert_fragment_keys(&self, fragment_keys: &[FragmentKey]) -> Result<usize> {
        let mut state = self.state.lock();
        for k in fragment_keys {
            let key = (k.artifact_id.clone(), k.fragment_id.clone(), k.seq_no, k.key.clone(), k.value.clone());
            let already_present = state.fragment_keys.iter().any(|existing| {
                (&existing.artifact_id, &existing.fragment_id, existing.seq_no, &existing.key, &existing.value)
                    == (&key.0, &key.1, key.2, &key.3, &key.4)
            });
            if !already_present {
                state.fragment_keys.push(k.clone());
            }
        }
        Ok(fragment_keys.len())
    }

    async fn insert_deferred_disaggregations(
        &self,
        deferred_disaggregations: &[DeferredDisaggregation],
    ) -> Result<usize> {
        let mut state = self.state.lock();
        for d in deferred_disaggregations {
            let key = (&d.source_id, d.generation_id, &d.artifact_id, &d.extractor_type, &d.fragment_id, d.start_byte, d.end_byte);
            state.deferred_disaggregations.retain(|existing| {
                (&existing.source_id, existing.generation_id, &existing.artifact_id, &existing.extractor_type, &existing.fragment_id, existing.start_byte, existing.end_byte)
                    != key
            });
            state.deferred_disaggregations.push(d.clone());
        }
        Ok(deferred_disaggregations.len())
    }

    async fn search_fragments(
        &self,
        source_id: &str,
        search: TextSearchQuery,
        limit: i64,
        offset: i64,
    ) -> Result<Page<FragmentView>> {
        ensure!(
            search.ngram || search.query.is_some(),
            crate::error::ValidationSnafu { message: "a query is required for text searches" }
        );
        ensure!(
            !search.ngram || search.query.is_some() || search.score_query.is_some(),
            crate::error::ValidationSnafu {
                message: "at least one of query or score_query must be supplied for ngram searches"
            }
        );
        let state = self.state.lock();
        let generation_id = search
            .filter
            .generation_id
            .or_else(|| Self::latest_generation_id(&state, source_id));
        let needle = search.score_query.as_deref().or(search.query.as_deref()).unwrap_or("");
        let needle_lower = needle.to_lowercase();

        let mut views: Vec<FragmentView> = state
            .fragments
            .iter()
            .filter(|f| f.source_id == source_id)
            .filter(|f| search.filter.aggregation_level.map_or(true, |lvl| f.aggregation_level == lvl))
            .filter_map(|f| {
                let artifact = state.artifacts.get(&f.artifact_id)?;
                if let Some(ext) = &search.filter.external_id {
                    if &artifact.external_id != ext {
                        return None;
                    }
                }
                let g = state
                    .generations
                    .iter()
                    .find(|g| g.source_id == source_id && g.artifact_id == f.artifact_id && Some(g.generation_id) == generation_id)?;
                if !f.text_content.to_lowercase().contains(&needle_lower) {
                    return None;
                }
                Some(FragmentView {
                    fragment: f.clone(),
                    external_id: artifact.external_id.clone(),
                    generation_id: g.generation_id,
                    relevance: Some(1.0),
                })
            })
            .collect();
        views.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap());
        Ok(paginate(views, limit, offset))
    }

    async fn search_fragments_json(
        &self,
        source_id: &str,
        terms: &[JsonSearchTerm],
        filter: SearchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<FragmentView>> {
        let state = self.state.lock();
        let generation_id = filter.generation_id.or_else(|| Self::latest_generation_id(&state, source_id));
        let views: Vec<FragmentView> = state
            .fragments
            .iter()
            .filter(|f| f.source_id == source_id)
            .filter(|f| filter.aggregation_level.map_or(true, |lvl| f.aggregation_level == lvl))
            .filter(|f| {
                terms.iter().all(|term| {
                    let Some(json) = &f.json_content else { return false };
                    let field = term.json_path.trim_start_matches("$.");
                    json.get(field).map_or(false, |v| term.values.contains(v))
                })
            })
            .filter_map(|f| {
                let artifact = state.artifacts.get(&f.artifact_id)?;
                if let Some(ext) = &filter.external_id {
                    if &artifact.external_id != ext {
                        return None;
                    }
                }
                let g = state
                    .generations
                    .iter()
                    .find(|g| g.source_id == source_id && g.artifact_id == f.artifact_id && Some(g.generation_id) == generation_id)?;
                Some(FragmentView {
                    fragment: f.clone(),
                    external_id: artifact.external_id.clone(),
                    generation_id: g.generation_id,
                    relevance: None,
                })
            })
            .collect();
        Ok(paginate(views, limit, offset))
    }

    async fn search_fragments_key(
        &self,
        source_id: &str,
        terms: &[KeySearchTerm],
        filter: SearchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<FragmentView>> {
        ensure!(
            is_hex32(source_id),
            InvalidSourceIdSnafu { source_id: source_id.to_string() }
        );
        let state = self.state.lock();
        let generation_id = filter.generation_id.or_else(|| Self::latest_generation_id(&state, source_id));

        // fragments identified by (artifact_id, fragment_id, seq_no) must carry
        // every requested key, each with one of that term's matching values.
        let mut per_fragment_keys: HashMap<(String, String, i32), HashSet<String>> = HashMap::new();
        for k in state.fragment_keys.iter().filter(|k| k.source_id == source_id) {
            if terms.iter().any(|t| t.key == k.key && t.values.contains(&k.value)) {
                per_fragment_keys.entry((k.artifact_id.clone(), k.fragment_id.clone(), k.seq_no)).or_default().insert(k.key.clone());
            }
        }
        let required: HashSet<String> = terms.iter().map(|t| t.key.clone()).collect();
        let matches: HashSet<(String, String, i32)> = per_fragment_keys
            .into_iter()
            .filter(|(_, keys)| *keys == required)
            .map(|(id, _)| id)
            .collect();

        let views: Vec<FragmentView> = state
            .fragments
            .iter()
            .filter(|f| f.source_id == source_id)
            .filter(|f| matches.contains(&(f.artifact_id.clone(), f.fragment_id.clone(), f.seq_no)))
            .filter(|f| filter.aggregation_level.map_or(true, |lvl| f.aggregation_level == lvl))
            .filter_map(|f| {
                let artifact = state.artifacts.get(&f.artifact_id)?;
                let g = state
                    .generations
                    .iter()
                    .find(|g| g.source_id == source_id && g.artifact_id == f.artifact_id && Some(g.generation_id) == generation_id)?;
                Some(FragmentView {
                    fragment: f.clone(),
                    external_id: artifact.external_id.clone(),
                    generation_id: g.generation_id,
                    relevance: None,
                })
            })
            .collect();
        Ok(paginate(views, limit, offset))
    }

    async fn get_deferred_disaggregations_by_date_range(
        &self,
        created_on_start: Time,
        created_on_end: Option<Time>,
        source_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<DeferredDisaggregation>> {
        let state = self.state.lock();
        let mut rows: Vec<DeferredDisaggregation> = state
            .deferred_disaggregations
            .iter()
            .filter(|d| d.created_on >= created_on_start)
            .filter(|d| created_on_end.map_or(true, |end| d.created_on <= end))
            .filter(|d| source_id.map_or(true, |sid| d.source_id == sid))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.source_id, a.created_on, status_rank(b.status))
                .cmp(&(&b.source_id, b.created_on, status_rank(a.status)))
        });
        Ok(paginate(rows, limit, offset))
    }

    async fn deferred_disaggregation_summary(
        &self,
        created_on_start: Time,
        created_on_end: Option<Time>,
        source_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<DeferredDisaggregationSummary>> {
        let state = self.state.lock();
        let rows: Vec<&DeferredDisaggregation> = state
            .deferred_disaggregations
            .iter()
            .filter(|d| d.created_on >= created_on_start)
            .filter(|d| created_on_end.map_or(true, |end| d.created_on <= end))
            .filter(|d| source_id.map_or(true, |sid| d.source_id == sid))
            .collect();

        let mut groups: HashMap<(String, i64, DisaggregationStatus), Vec<&DeferredDisaggregation>> = HashMap::new();
        for d in rows {
            groups.entry((d.source_id.clone(), d.generation_id, d.status)).or_default().push(d);
        }

        let mut summaries: Vec<DeferredDisaggregationSummary> = groups
            .into_iter()
            .map(|((source_id, generation_id, status), rows)| {
                let min_created_on = rows.iter().map(|d| d.created_on).min().unwrap();
                let max_created_on = rows.iter().map(|d| d.created_on).max().unwrap();
                let artifact_count = rows.iter().map(|d| d.artifact_id.clone()).collect::<HashSet<_>>().len() as i64;
                let disaggregation_count = rows.len() as i64;
                let avg_delivery_attempt =
                    rows.iter().map(|d| d.delivery_attempt as f64).sum::<f64>() / rows.len() as f64;
                DeferredDisaggregationSummary {
                    source_id,
                    generation_id,
                    status,
                    min_created_on,
                    max_created_on,
                    artifact_count,
                    disaggregation_count,
                    avg_delivery_attempt,
                }
            })
            .collect();
        summaries.sort_by(|a, b| {
            (&a.source_id, a.generation_id, a.min_created_on)
                .cmp(&(&b.source_id, b.generation_id, b.min_created_on))
        });
        Ok(paginate(summaries, limit, offset))
    }
}

fn status_rank(status: DisaggregationStatus) -> i32 {
    match status {
        DisaggregationStatus::Pending => 2,
        DisaggregationStatus::Done => 1,
        DisaggregationStatus::Failed => 0,
    }
}

fn is_hex32(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn paginate<T>(mut records: Vec<T>, limit: i64, offset: i64) -> Page<T> {
    let offset = offset.max(0) as usize;
    let limit = limit.max(0) as usize;
    if offset >= records.len() {
        return Page::new(Vec::new(), limit as i64, offset as i64);
    }
    let end = (offset + limit).min(records.len());
    let page = records.split_off(offset);
    let page: Vec<T> = page.into_iter().take(end - offset).collect();
    Page::new(page, limit as i64, offset as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cif_time::{SystemProvider, TimeProvider};

    fn now() -> Time {
        SystemProvider::default().now()
    }

    #[tokio::test]
    async fn stage_then_promote_creates_artifact_and_generation() {
        let catalog = InMemoryCatalog::new();
        let created_on = now();
        catalog
            .insert_stage_batch(
                "stage-1",
                "source-1",
                0,
                &[(
                    "a.txt".to_string(),
                    Fingerprint { content_type: "text/plain".into(), content_length: 3, version: "v1".into() },
                )],
                created_on,
            )
            .await
            .unwrap();

        let (reconciled, inserted, total) =
            catalog.insert_artifact_generation_batch("stage-1", "source-1", 0).await.unwrap();
        assert_eq!((reconciled, inserted, total), (0, 1, 1));

        let latest = catalog.get_latest_generation("source-1").await.unwrap().unwrap();
        assert_eq!(latest.generation_id, created_on.timestamp_micros());

        let artifacts = catalog.get_new_artifacts("source-1", latest.generation_id, 100, 0).await.unwrap();
        assert_eq!(artifacts.records.len(), 1);
        assert_eq!(artifacts.records[0].external_id, "a.txt");
    }

    #[tokio::test]
    async fn reintake_with_no_changes_reconciles_without_new_artifact() {
        let catalog = InMemoryCatalog::new();
        let created_on = now();
        let fp = Fingerprint { content_type: "text/plain".into(), content_length: 3, version: "v1".into() };
        catalog
            .insert_stage_batch("s1", "source-1", 0, &[("a.txt".to_string(), fp.clone())], created_on)
            .await
            .unwrap();
        catalog.insert_artifact_generation_batch("s1", "source-1", 0).await.unwrap();

        catalog
            .insert_stage_batch("s2", "source-1", 0, &[("a.txt".to_string(), fp)], created_on)
            .await
            .unwrap();
        let (reconciled, inserted, total) =
            catalog.insert_artifact_generation_batch("s2", "source-1", 0).await.unwrap();
        assert_eq!((reconciled, inserted, total), (1, 0, 1));

        let inserted_updated = catalog.count_inserted_updated("s2", "source-1", created_on.timestamp_micros()).await.unwrap();
        assert_eq!(inserted_updated, 0);
    }

    #[tokio::test]
    async fn diff_generations_classifies_every_change_kind() {
        let catalog = InMemoryCatalog::new();
        let t1 = now();
        catalog
            .insert_stage_batch(
                "s1",
                "src",
                0,
                &[
                    ("kept.txt".into(), Fingerprint { content_type: "text/plain".into(), content_length: 1, version: "v1".into() }),
                    ("removed.txt".into(), Fingerprint { content_type: "text/plain".into(), content_length: 1, version: "v1".into() }),
                    ("updated.txt".into(), Fingerprint { content_type: "text/plain".into(), content_length: 1, version: "v1".into() }),
                ],
                t1,
            )
            .await
            .unwrap();
        catalog.insert_artifact_generation_batch("s1", "src", 0).await.unwrap();
        let gen_a = catalog.get_latest_generation("src").await.unwrap().unwrap().generation_id;

        let t2 = Time::from_timestamp_micros(t1.timestamp_micros() + 1_000_000);
        catalog
            .insert_stage_batch(
                "s2",
                "src",
                0,
                &[
                    ("kept.txt".into(), Fingerprint { content_type: "text/plain".into(), content_length: 1, version: "v1".into() }),
                    ("updated.txt".into(), Fingerprint { content_type: "text/plain".into(), content_length: 1, version: "v2".into() }),
                    ("added.txt".into(), Fingerprint { content_type: "text/plain".into(), content_length: 1, version: "v1".into() }),
                ],
                t2,
            )
            .await
            .unwrap();
        catalog.insert_artifact_generation_batch("s2", "src", 0).await.unwrap();
        let gen_b = catalog.get_latest_generation("src").await.unwrap().unwrap().generation_id;

        let diff = catalog.diff_generations("src", gen_a, gen_b, 100, 0).await.unwrap();
        let find = |id: &str| diff.records.iter().find(|c| c.external_id == id).unwrap().change;
        assert_eq!(find("kept.txt"), ChangeKind::Unchanged);
        assert_eq!(find("removed.txt"), ChangeKind::Deleted);
        assert_eq!(find("updated.txt"), ChangeKind::Updated);
        assert_eq!(find("added.txt"), ChangeKind::Inserted);
    }

    #[tokio::test]
    async fn insert_deferred_disaggregations_upserts_on_the_task_key() {
        let catalog = InMemoryCatalog::new();
        let created_on = now();
        let pending = DeferredDisaggregation {
            source_id: "src".into(),
            generation_id: 1,
            artifact_id: "artifact-1".into(),
            extractor_type: "pdf".into(),
            fragment_id: None,
            start_byte: None,
            end_byte: None,
            created_on,
            status: DisaggregationStatus::Pending,
            delivery_attempt: 0,
        };
        catalog.insert_deferred_disaggregations(std::slice::from_ref(&pending)).await.unwrap();

        let done = DeferredDisaggregation { status: DisaggregationStatus::Done, delivery_attempt: 1, ..pending };
        catalog.insert_deferred_disaggregations(std::slice::from_ref(&done)).await.unwrap();

        let page = catalog
            .get_deferred_disaggregations_by_date_range(created_on, None, Some("src"), 100, 0)
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1, "the second write must replace the first, not duplicate it");
        assert_eq!(page.records[0].status, DisaggregationStatus::Done);
        assert_eq!(page.records[0].delivery_attempt, 1);
    }

    #[tokio::test]
    async fn insert_fragments_upserts_on_artifact_fragment_seq() {
        let catalog = InMemoryCatalog::new();
        let created_on = now();
        catalog
            .insert_stage_batch(
                "s1",
                "src",
                0,
                &[("a.txt".to_string(), Fingerprint { content_type: "text/plain".into(), content_length: 1, version: "v1".into() })],
                created_on,
            )
            .await
            .unwrap();
        catalog.insert_artifact_generation_batch("s1", "src", 0).await.unwrap();
        let latest = catalog.get_latest_generation("src").await.unwrap().unwrap();
        let artifact_id = latest.artifact_id.clone();

        let original = Fragment {
            source_id: "src".into(),
            artifact_id: artifact_id.clone(),
            fragment_id: "frag-1".into(),
            seq_no: 0,
            aggregation_level: AggregationLevel::Document,
            text_content: "first".into(),
            json_content: None,
        };
        catalog.insert_fragments(&[original.clone()]).await.unwrap();

        let updated = Fragment { text_content: "second".into(), ..original };
        catalog.insert_fragments(&[updated]).await.unwrap();

        let page = catalog
            .search_fragments(
                "src",
                TextSearchQuery {
                    query: Some("firs".into()),
                    score_query: None,
                    ngram: false,
                    filter: SearchFilter { generation_id: Some(latest.generation_id), ..SearchFilter::default() },
                },
                100,
                0,
            )
            .await
            .unwrap();
        assert_eq!(page.records.len(), 0, "the stale text must not still be searchable");

        let page = catalog
            .search_fragments(
                "src",
                TextSearchQuery {
                    query: Some("second".into()),
                    score_query: None,
                    ngram: false,
                    filter: SearchFilter { generation_id: Some(latest.generation_id), ..SearchFilter::default() },
                },
                100,
                0,
            )
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1, "the second write must replace the first, not duplicate it");
    }
}
