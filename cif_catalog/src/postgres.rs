//! A Postgres-backed [`Catalog`].
//!
//! Schema mirrors the original Spanner tables 1:1 (`source`, `stage`,
//! `artifact`, `generation`, `fragment`, `fragment_key`,
//! `deferred_disaggregation`); see the migrations shipped alongside `cifd`
//! in `cifd/migrations/`. `generation_id` is derived from `created_on`
//! truncated to microseconds, exactly as in [`crate::mem::InMemoryCatalog`].
//!
//! Every query runs under [`PostgresCatalog::query_timeout`] (spec.md §5);
//! a handful of mutating operations -- the promotion transaction chief among
//! them -- additionally retry known-transient faults locally through
//! [`backoff::Backoff`] before escalating to `cif_types::Error::Transient`
//! (spec.md §7).

use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{Backoff, BackoffConfig};
use cif_time::Time;
use cif_types::{
    AggregationLevel, Artifact, ArtifactChange, ChangeKind, DeferredDisaggregation,
    DeferredDisaggregationSummary, DisaggregationStatus, Fingerprint, Fragment, FragmentKey,
    FragmentView, Generation, JsonSearchTerm, KeySearchTerm, Page, SearchFilter, Source,
};
use observability_deps::tracing::debug;
use snafu::ensure;
use sqlx::{postgres::PgPoolOptions, PgPool, QueryBuilder, Row};

use crate::error::InvalidSourceIdSnafu;
use crate::interface::{Catalog, PromotionCounts, TextSearchQuery};
use crate::limits::{DEFAULT_QUERY_TIMEOUT, MAX_TRANSIENT_RETRIES, STAGING_BATCH_SIZE};
use crate::Result;

/// A [`Catalog`] backed by a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
    query_timeout: Duration,
}

impl PostgresCatalog {
    /// Connect to `database_url`, establishing a bounded connection pool and
    /// using [`DEFAULT_QUERY_TIMEOUT`] as the per-query deadline.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_timeout(database_url, DEFAULT_QUERY_TIMEOUT).await
    }

    /// Connect to `database_url`, with an explicit per-query deadline
    /// (`CIF_QUERY_TIMEOUT_SECS` in `cifd`).
    pub async fn connect_with_timeout(database_url: &str, query_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(query_timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool, query_timeout })
    }

    /// Wrap an already-connected pool, using [`DEFAULT_QUERY_TIMEOUT`].
    pub fn new(pool: PgPool) -> Self {
        Self::new_with_timeout(pool, DEFAULT_QUERY_TIMEOUT)
    }

    /// Wrap an already-connected pool with an explicit per-query deadline.
    pub fn new_with_timeout(pool: PgPool, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    /// Runs one query future under [`Self::query_timeout`], classifying an
    /// elapsed deadline as [`crate::Error::Timeout`] rather than letting the
    /// query run (and the caller block) indefinitely (spec.md §5).
    async fn timed<T>(&self, fut: impl std::future::Future<Output = std::result::Result<T, sqlx::Error>>) -> Result<T> {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => crate::error::TimeoutSnafu {
                message: format!("query exceeded {:?} deadline", self.query_timeout),
            }
            .fail(),
        }
    }

    /// Retries `op` up to [`MAX_TRANSIENT_RETRIES`] times, with jittered
    /// exponential backoff between attempts, as long as each failure is
    /// classified transient (spec.md §7: "recovers locally only from known
    /// transient faults during DB transactions"). Any other failure, or a
    /// transient one that has exhausted its retries, is returned as-is.
    async fn with_local_retry<T, F, Fut>(&self, task_name: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
    {
        let mut backoff = Backoff::new(&BackoffConfig::default());
        let mut attempt = 0u32;
        backoff
            .retry_with_backoff(task_name, move || {
                attempt += 1;
                let fut = op();
                async move {
                    match fut.await {
                        Ok(value) => ControlFlow::Break(Ok(value)),
                        Err(err) if attempt < MAX_TRANSIENT_RETRIES && err.is_transient() => ControlFlow::Continue(err),
                        Err(err) => ControlFlow::Break(Err(err)),
                    }
                }
            })
            .await
            .unwrap_or_else(|infallible: std::convert::Infallible| match infallible {})
    }

    async fn insert_stage_batch_once(
        &self,
        stage_id: &str,
        source_id: &str,
        batch_id: i64,
        batch_artifacts: &[(String, Fingerprint)],
        created_on: Time,
    ) -> Result<usize> {
        let mut tx = self.timed(self.pool.begin()).await?;
        let mut inserted = 0usize;
        for (external_id, fingerprint) in batch_artifacts {
            let artifact_id = uuid::Uuid::new_v4().simple().to_string();
            self.timed(
                sqlx::query(
                    r#"
                    insert into stage
                    (stage_id, batch_id, source_id, external_id, version, content_length, content_type, created_on, artifact_id)
                    values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(stage_id)
                .bind(batch_id)
                .bind(source_id)
                .bind(external_id)
                .bind(&fingerprint.version)
                .bind(fingerprint.content_length)
                .bind(&fingerprint.content_type)
                .bind(created_on.as_datetime())
                .bind(artifact_id)
                .execute(&mut tx),
            )
            .await?;
            inserted += 1;
        }
        self.timed(tx.commit()).await?;
        debug!(stage_id, batch_id, inserted, "staged batch");
        Ok(inserted)
    }

    async fn insert_artifact_generation_batch_once(
        &self,
        stage_id: &str,
        source_id: &str,
        batch_id: i64,
    ) -> Result<PromotionCounts> {
        let mut tx = self.timed(self.pool.begin()).await?;

        // Pass 1: reconcile stage rows against pre-existing artifacts.
        let pass_1 = self
            .timed(
                sqlx::query(
                    r#"
                    update stage s
                    set artifact_id = a0.artifact_id
                    from artifact a0
                    where a0.source_id = s.source_id and a0.external_id = s.external_id and a0.version = s.version
                    and s.stage_id = $1 and s.batch_id = $2 and s.source_id = $3
                    "#,
                )
                .bind(stage_id)
                .bind(batch_id)
                .bind(source_id)
                .execute(&mut tx),
            )
            .await?
            .rows_affected() as i64;

        // Pass 2: insert new artifacts, ignoring rows whose artifact_id now matches one that exists.
        let pass_2 = self
            .timed(
                sqlx::query(
                    r#"
                    insert into artifact (artifact_id, source_id, external_id, version, content_type, content_length, created_on)
                    select artifact_id, source_id, external_id, version, content_type, content_length, created_on
                    from stage
                    where stage_id = $1 and batch_id = $2 and source_id = $3
                    on conflict (artifact_id) do nothing
                    "#,
                )
                .bind(stage_id)
                .bind(batch_id)
                .bind(source_id)
                .execute(&mut tx),
            )
            .await?
            .rows_affected() as i64;

        // Pass 3: materialize generation membership for the whole batch.
        let pass_3 = self
            .timed(
                sqlx::query(
                    r#"
                    insert into generation (source_id, generation_id, artifact_id, created_on)
                    select source_id, (extract(epoch from date_trunc('microseconds', created_on)) * 1000000)::bigint, artifact_id, created_on
                    from stage
                    where stage_id = $1 and batch_id = $2 and source_id = $3
                    "#,
                )
                .bind(stage_id)
                .bind(batch_id)
                .bind(source_id)
                .execute(&mut tx),
            )
            .await?
            .rows_affected() as i64;

        self.timed(tx.commit()).await?;
        debug!(stage_id, batch_id, pass_1, pass_2, pass_3, "promoted batch");
        Ok((pass_1, pass_2, pass_3))
    }
}

fn is_hex32(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn row_to_artifact(row: &sqlx::postgres::PgRow) -> Artifact {
    Artifact {
        source_id: row.get("source_id"),
        artifact_id: row.get("artifact_id"),
        external_id: row.get("external_id"),
        version: row.get("version"),
        content_type: row.get("content_type"),
        content_length: row.get("content_length"),
        created_on: Time::from_datetime(row.get("created_on")),
    }
}

fn row_to_source(row: &sqlx::postgres::PgRow) -> Result<Source> {
    let connector_config: sqlx::types::Json<cif_types::ConnectorConfig> = row.get("connector_config");
    let extractor_configs: sqlx::types::Json<Vec<cif_types::ExtractorConfig>> = row.get("extractor_configs");
    let mode: String = row.get("disaggregation_mode");
    let disaggregation_mode = match mode.as_str() {
        "IMMEDIATE" => cif_types::DisaggregationMode::Immediate,
        "IMMEDIATE_CHUNKED" => cif_types::DisaggregationMode::ImmediateChunked,
        "DEFERRED" => cif_types::DisaggregationMode::Deferred,
        _ => cif_types::DisaggregationMode::DeferredChunked,
    };
    Ok(Source {
        source_id: row.get("source_id"),
        external_id: row.get("external_id"),
        category: row.get("category"),
        created_on: Time::from_datetime(row.get("created_on")),
        enabled: row.get("enabled"),
        connector_config: connector_config.0,
        extractor_configs: extractor_configs.0,
        disaggregation_mode,
        retain_generations: row.get::<i32, _>("retain_generations") as u32,
    })
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn get_latest_generation(&self, source_id: &str) -> Result<Option<Generation>> {
        let row = self
            .timed(
                sqlx::query(
                    "select source_id, generation_id, artifact_id, created_on from generation \
                     where source_id = $1 order by generation_id desc limit 1",
                )
                .bind(source_id)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|r| Generation {
            source_id: r.get("source_id"),
            generation_id: r.get("generation_id"),
            artifact_id: r.get("artifact_id"),
            created_on: Time::from_datetime(r.get("created_on")),
        }))
    }

    async fn count_inserted_updated(&self, stage_id: &str, source_id: &str, generation_id: i64) -> Result<i64> {
        let row = self
            .timed(
                sqlx::query(
                    r#"
                    select count(*) as n from stage s
                    where s.stage_id = $1 and s.source_id = $2
                    and not exists (
                        select * from generation g
                        inner join artifact a on a.source_id = g.source_id and a.artifact_id = g.artifact_id
                        where g.generation_id = $3 and g.source_id = s.source_id
                        and a.external_id = s.external_id and a.version = s.version
                    )
                    "#,
                )
                .bind(stage_id)
                .bind(source_id)
                .bind(generation_id)
                .fetch_one(&self.pool),
            )
            .await?;
        Ok(row.get("n"))
    }

    async fn count_deleted(&self, stage_id: &str, source_id: &str, generation_id: i64) -> Result<i64> {
        let row = self
            .timed(
                sqlx::query(
                    r#"
                    select count(*) as n from generation g
                    inner join artifact a on g.source_id = a.source_id and g.artifact_id = a.artifact_id
                    where g.source_id = $1 and g.generation_id = $2
                    and not exists (
                        select * from stage s
                        where s.stage_id = $3 and s.source_id = $1
                        and s.external_id = a.external_id and s.version = a.version
                    )
                    "#,
                )
                .bind(source_id)
                .bind(generation_id)
                .bind(stage_id)
                .fetch_one(&self.pool),
            )
            .await?;
        Ok(row.get("n"))
    }

    async fn insert_stage_batch(
        &self,
        stage_id: &str,
        source_id: &str,
        batch_id: i64,
        batch_artifacts: &[(String, Fingerprint)],
        created_on: Time,
    ) -> Result<usize> {
        debug_assert!(batch_artifacts.len() <= STAGING_BATCH_SIZE);
        self.with_local_retry("insert_stage_batch", || {
            self.insert_stage_batch_once(stage_id, source_id, batch_id, batch_artifacts, created_on)
        })
        .await
    }

    async fn insert_artifact_generation_batch(
        &self,
        stage_id: &str,
        source_id: &str,
        batch_id: i64,
    ) -> Result<PromotionCounts> {
        self.with_local_retry("promote_stage_batch", || {
            self.insert_artifact_generation_batch_once(stage_id, source_id, batch_id)
        })
        .await
    }

    async fn get_sources(&self, limit: i64, offset: i64) -> Result<Page<Source>> {
        let rows = self
            .timed(
                sqlx::query("select * from source order by source_id limit $1 offset $2")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool),
            )
            .await?;
        let sources = rows.iter().map(row_to_source).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(sources, limit, offset))
    }

    async fn get_source(&self, source_id: &str) -> Result<Option<Source>> {
        let row = self
            .timed(
                sqlx::query("select * from source where source_id = $1")
                    .bind(source_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.as_ref().map(row_to_source).transpose()
    }

    async fn get_sources_by_external_id_like(
        &self,
        external_id_pattern: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Source>> {
        let rows = self
            .timed(
                sqlx::query("select * from source where external_id like $1 order by source_id limit $2 offset $3")
                    .bind(external_id_pattern)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool),
            )
            .await?;
        let sources = rows.iter().map(row_to_source).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(sources, limit, offset))
    }

    async fn get_generations(&self, source_id: &str, limit: i64, offset: i64) -> Result<Page<Generation>> {
        let rows = self
            .timed(
                sqlx::query(
                    "select distinct on (source_id, generation_id) source_id, generation_id, artifact_id, created_on \
                     from generation where source_id = $1 order by source_id, generation_id desc limit $2 offset $3",
                )
                .bind(source_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
            )
            .await?;
        let generations = rows
            .iter()
            .map(|r| Generation {
                source_id: r.get("source_id"),
                generation_id: r.get("generation_id"),
                artifact_id: r.get("artifact_id"),
                created_on: Time::from_datetime(r.get("created_on")),
            })
            .collect();
        Ok(Page::new(generations, limit, offset))
    }

    async fn get_generation(&self, source_id: &str, generation_id: i64) -> Result<Option<Generation>> {
        let row = self
            .timed(
                sqlx::query(
                    "select source_id, generation_id, artifact_id, created_on from generation \
                     where source_id = $1 and generation_id = $2 limit 1",
                )
                .bind(source_id)
                .bind(generation_id)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|r| Generation {
            source_id: r.get("source_id"),
            generation_id: r.get("generation_id"),
            artifact_id: r.get("artifact_id"),
            created_on: Time::from_datetime(r.get("created_on")),
        }))
    }

    async fn get_artifacts(
        &self,
        source_id: &str,
        generation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Artifact>> {
        let rows = self
            .timed(
                sqlx::query(
                    r#"
                    select a.source_id, a.artifact_id, a.created_on, a.external_id, a.version, a.content_length, a.content_type
                    from artifact a
                    where a.artifact_id in (
                        select g.artifact_id from generation g where g.source_id = $1 and g.generation_id = $2
                    )
                    order by a.artifact_id
                    limit $3 offset $4
                    "#,
                )
                .bind(source_id)
                .bind(generation_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(Page::new(rows.iter().map(row_to_artifact).collect(), limit, offset))
    }

    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>> {
        let row = self
            .timed(
                sqlx::query("select * from artifact where artifact_id = $1")
                    .bind(artifact_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.as_ref().map(row_to_artifact))
    }

    async fn get_new_artifacts(
        &self,
        source_id: &str,
        generation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Artifact>> {
        let rows = self
            .timed(
                sqlx::query(
                    r#"
                    select a.source_id, a.artifact_id, a.created_on, a.external_id, a.version, a.content_length, a.content_type
                    from artifact a
                    inner join generation g on g.artifact_id = a.artifact_id and g.created_on = a.created_on
                    where g.source_id = $1 and g.generation_id = $2
                    order by a.artifact_id
                    limit $3 offset $4
                    "#,
                )
                .bind(source_id)
                .bind(generation_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(Page::new(rows.iter().map(row_to_artifact).collect(), limit, offset))
    }

    async fn diff_generations(
        &self,
        source_id: &str,
        generation_id_a: i64,
        generation_id_b: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Page<ArtifactChange>> {
        let rows = self
            .timed(
                sqlx::query(
                    r#"
                    select
                        coalesce(a.external_id, b.external_id) as external_id,
                        a.artifact_id as artifact_id_a,
                        b.artifact_id as artifact_id_b
                    from (
                        select a0.external_id, a0.artifact_id from generation g
                        inner join artifact a0 on a0.artifact_id = g.artifact_id
                        where g.source_id = $1 and g.generation_id = $2
                    ) as a
                    full outer join (
                        select a0.external_id, a0.artifact_id from generation g
                        inner join artifact a0 on a0.artifact_id = g.artifact_id
                        where g.source_id = $1 and g.generation_id = $3
                    ) as b
                    on a.external_id = b.external_id
                    order by external_id
                    limit $4 offset $5
                    "#,
                )
                .bind(source_id)
                .bind(generation_id_a)
                .bind(generation_id_b)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
            )
            .await?;
        let changes = rows
            .iter()
            .map(|r| {
                let artifact_id_a: Option<String> = r.get("artifact_id_a");
                let artifact_id_b: Option<String> = r.get("artifact_id_b");
                let change = match (&artifact_id_a, &artifact_id_b) {
                    (None, Some(_)) => ChangeKind::Inserted,
                    (Some(_), None) => ChangeKind::Deleted,
                    (Some(a), Some(b)) if a != b => ChangeKind::Updated,
                    _ => ChangeKind::Unchanged,
                };
                ArtifactChange { external_id: r.get("external_id"), artifact_id_a, artifact_id_b, change }
            })
            .collect();
        Ok(Page::new(changes, limit, offset))
    }

    async fn insert_fragments(&self, fragments: &[Fragment]) -> Result<usize> {
        if fragments.is_empty() {
            return Ok(0);
        }
        self.with_local_retry("insert_fragments", || async {
            let mut tx = self.timed(self.pool.begin()).await?;
            for f in fragments {
                self.timed(
                    sqlx::query(
                        r#"
                        insert into fragment (source_id, artifact_id, fragment_id, seq_no, aggregation_level, text_content, json_content)
                        values ($1, $2, $3, $4, $5, $6, $7)
                        on conflict (artifact_id, fragment_id, seq_no) do update set
                            source_id = excluded.source_id,
                            aggregation_level = excluded.aggregation_level,
                            text_content = excluded.text_content,
                            json_content = excluded.json_content
                        "#,
                    )
                    .bind(&f.source_id)
                    .bind(&f.artifact_id)
                    .bind(&f.fragment_id)
                    .bind(f.seq_no)
                    .bind(aggregation_level_str(f.aggregation_level))
                    .bind(&f.text_content)
                    .bind(&f.json_content)
                    .execute(&mut tx),
                )
                .await?;
            }
            self.timed(tx.commit()).await?;
            Ok(fragments.len())
        })
        .await
    }

    async fn insert_fragment_keys(&self, fragment_keys: &[FragmentKey]) -> Result<usize> {
        if fragment_keys.is_empty() {
            return Ok(0);
        }
        self.with_local_retry("insert_fragment_keys", || async {
            let mut tx = self.timed(self.pool.begin()).await?;
            for k in fragment_keys {
                self.timed(
                    sqlx::query(
                        r#"
                        insert into fragment_key (source_id, artifact_id, fragment_id, seq_no, key, value)
                        values ($1, $2, $3, $4, $5, $6)
                        on conflict (artifact_id, fragment_id, seq_no, key, value) do nothing
                        "#,
                    )
                    .bind(&k.source_id)
                    .bind(&k.artifact_id)
                    .bind(&k.fragment_id)
                    .bind(k.seq_no)
                    .bind(&k.key)
                    .bind(&k.value)
                    .execute(&mut tx),
                )
                .await?;
            }
            self.timed(tx.commit()).await?;
            Ok(fragment_keys.len())
        })
        .await
    }

    async fn insert_deferred_disaggregations(&self, msgs: &[DeferredDisaggregation]) -> Result<usize> {
        if msgs.is_empty() {
            return Ok(0);
        }
        self.with_local_retry("insert_deferred_disaggregations", || async {
            let mut tx = self.timed(self.pool.begin()).await?;
            for m in msgs {
                self.timed(
                    sqlx::query(
                        r#"
                        insert into deferred_disaggregation
                        (source_id, generation_id, artifact_id, extractor_type, fragment_id, start_byte, end_byte, created_on, status, delivery_attempt)
                        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                        on conflict (source_id, generation_id, artifact_id, extractor_type, coalesce(fragment_id, ''), coalesce(start_byte, -1), coalesce(end_byte, -1))
                        do update set
                            status = excluded.status,
                            delivery_attempt = excluded.delivery_attempt,
                            created_on = excluded.created_on
                        "#,
                    )
                    .bind(&m.source_id)
                    .bind(m.generation_id)
                    .bind(&m.artifact_id)
                    .bind(&m.extractor_type)
                    .bind(&m.fragment_id)
                    .bind(m.start_byte)
                    .bind(m.end_byte)
                    .bind(m.created_on.as_datetime())
                    .bind(disaggregation_status_str(m.status))
                    .bind(m.delivery_attempt)
                    .execute(&mut tx),
                )
                .await?;
            }
            self.timed(tx.commit()).await?;
            Ok(msgs.len())
        })
        .await
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
        let score_query = search.score_query.or_else(|| search.query.clone());

        let relevance = if search.ngram {
            "similarity(f.text_content, "
        } else {
            "ts_rank(f.text_tokens, plainto_tsquery("
        };

        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "select f.*, a.external_id, g.generation_id, ",
        );
        qb.push(relevance);
        qb.push_bind(score_query.clone());
        qb.push(if search.ngram { ")" } else { "))" });
        qb.push(" as relevance from fragment f \
            inner join generation g on f.source_id = g.source_id and f.artifact_id = g.artifact_id \
            inner join artifact a on f.source_id = a.source_id and a.artifact_id = f.artifact_id \
            where f.source_id = ");
        qb.push_bind(source_id.to_string());

        if let Some(lvl) = search.filter.aggregation_level {
            qb.push(" and f.aggregation_level = ");
            qb.push_bind(aggregation_level_str(lvl));
        }
        if let Some(generation_id) = search.filter.generation_id {
            qb.push(" and g.generation_id = ");
            qb.push_bind(generation_id);
        } else {
            qb.push(" and g.generation_id = (select max(generation_id) from generation where source_id = ");
            qb.push_bind(source_id.to_string());
            qb.push(")");
        }
        if let Some(external_id) = &search.filter.external_id {
            qb.push(" and a.external_id = ");
            qb.push_bind(external_id.clone());
        }
        if let Some(query) = &search.query {
            if search.ngram {
                qb.push(" and f.text_content % ");
                qb.push_bind(query.clone());
            } else {
                qb.push(" and f.text_tokens @@ plainto_tsquery(");
                qb.push_bind(query.clone());
                qb.push(")");
            }
        }
        qb.push(" order by relevance desc limit ");
        qb.push_bind(limit);
        qb.push(" offset ");
        qb.push_bind(offset);

        let rows = self.timed(qb.build().fetch_all(&self.pool)).await?;
        let views = rows.iter().map(row_to_fragment_view).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(views, limit, offset))
    }

    async fn search_fragments_json(
        &self,
        source_id: &str,
        terms: &[JsonSearchTerm],
        filter: SearchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<FragmentView>> {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "select f.*, a.external_id, g.generation_id from fragment f \
             inner join generation g on f.source_id = g.source_id and f.artifact_id = g.artifact_id \
             inner join artifact a on f.source_id = a.source_id and a.artifact_id = f.artifact_id \
             where f.source_id = ",
        );
        qb.push_bind(source_id.to_string());
        for term in terms {
            qb.push(" and f.json_content #>> ");
            qb.push_bind(json_path_to_pg(&term.json_path));
            qb.push(" = any(");
            qb.push_bind(term.values.iter().map(|v| v.to_string()).collect::<Vec<_>>());
            qb.push(")");
        }
        push_common_filter(&mut qb, &filter, source_id);
        qb.push(" limit ");
        qb.push_bind(limit);
        qb.push(" offset ");
        qb.push_bind(offset);

        let rows = self.timed(qb.build().fetch_all(&self.pool)).await?;
        let views = rows.iter().map(row_to_fragment_view).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(views, limit, offset))
    }

    async fn search_fragments_key(
        &self,
        source_id: &str,
        terms: &[KeySearchTerm],
        filter: SearchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Page<FragmentView>> {
        // `source_id` is written directly into the query text below rather
        // than bound, because it must appear inside a dynamically built
        // subquery that `sqlx::QueryBuilder` cannot parameterize across a
        // `group by having count(...)` boundary portably; every *value* the
        // caller supplies is still bound, never interpolated. See
        // `DESIGN.md` Open Question 3.
        ensure!(
            is_hex32(source_id),
            InvalidSourceIdSnafu { source_id: source_id.to_string() }
        );

        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(format!(
            "select f.*, a.external_id, g.generation_id from fragment f \
             join (select source_id, artifact_id, fragment_id, seq_no from fragment_key where ("
        ));
        for (i, term) in terms.iter().enumerate() {
            if i > 0 {
                qb.push(" or ");
            }
            qb.push("(key = ");
            qb.push_bind(term.key.clone());
            qb.push(" and value = any(");
            qb.push_bind(term.values.clone());
            qb.push("))");
        }
        qb.push(format!(
            ") and source_id = '{source_id}' group by source_id, artifact_id, fragment_id, seq_no \
             having count(distinct key) = {}) matches \
             on f.source_id = matches.source_id and f.artifact_id = matches.artifact_id \
             and f.fragment_id = matches.fragment_id and f.seq_no = matches.seq_no \
             inner join artifact a on f.artifact_id = a.artifact_id and f.source_id = a.source_id \
             inner join generation g on f.artifact_id = g.artifact_id and f.source_id = g.source_id \
             where f.source_id = '{source_id}'",
            terms.len()
        ));
        push_common_filter_no_source(&mut qb, &filter);
        qb.push(" limit ");
        qb.push_bind(limit);
        qb.push(" offset ");
        qb.push_bind(offset);

        let rows = self.timed(qb.build().fetch_all(&self.pool)).await?;
        let views = rows.iter().map(row_to_fragment_view).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(views, limit, offset))
    }

    async fn get_deferred_disaggregations_by_date_range(
        &self,
        created_on_start: Time,
        created_on_end: Option<Time>,
        source_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<DeferredDisaggregation>> {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new("select * from deferred_disaggregation where created_on >= ");
        qb.push_bind(created_on_start.as_datetime());
        if let Some(end) = created_on_end {
            qb.push(" and created_on <= ");
            qb.push_bind(end.as_datetime());
        }
        if let Some(sid) = source_id {
            qb.push(" and source_id = ");
            qb.push_bind(sid.to_string());
        }
        qb.push(" order by source_id, created_on, status desc limit ");
        qb.push_bind(limit);
        qb.push(" offset ");
        qb.push_bind(offset);

        let rows = self.timed(qb.build().fetch_all(&self.pool)).await?;
        let records = rows
            .iter()
            .map(|r| {
                let status: String = r.get("status");
                DeferredDisaggregation {
                    source_id: r.get("source_id"),
                    generation_id: r.get("generation_id"),
                    artifact_id: r.get("artifact_id"),
                    extractor_type: r.get("extractor_type"),
                    fragment_id: r.get("fragment_id"),
                    start_byte: r.get("start_byte"),
                    end_byte: r.get("end_byte"),
                    created_on: Time::from_datetime(r.get("created_on")),
                    status: parse_disaggregation_status(&status),
                    delivery_attempt: r.get("delivery_attempt"),
                }
            })
            .collect();
        Ok(Page::new(records, limit, offset))
    }

    async fn deferred_disaggregation_summary(
        &self,
        created_on_start: Time,
        created_on_end: Option<Time>,
        source_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<DeferredDisaggregationSummary>> {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            r#"select source_id, generation_id, status,
               min(created_on) as min_created_on, max(created_on) as max_created_on,
               count(distinct artifact_id) as artifact_count, count(*) as disaggregation_count,
               avg(delivery_attempt)::float8 as avg_delivery_attempt
               from deferred_disaggregation where created_on >= "#,
        );
        qb.push_bind(created_on_start.as_datetime());
        if let Some(end) = created_on_end {
            qb.push(" and created_on <= ");
            qb.push_bind(end.as_datetime());
        }
        if let Some(sid) = source_id {
            qb.push(" and source_id = ");
            qb.push_bind(sid.to_string());
        }
        qb.push(
            " group by source_id, generation_id, status order by source_id, generation_id, min_created_on, status limit ",
        );
        qb.push_bind(limit);
        qb.push(" offset ");
        qb.push_bind(offset);

        let rows = self.timed(qb.build().fetch_all(&self.pool)).await?;
        let records = rows
            .iter()
            .map(|r| {
                let status: String = r.get("status");
                DeferredDisaggregationSummary {
                    source_id: r.get("source_id"),
                    generation_id: r.get("generation_id"),
                    status: parse_disaggregation_status(&status),
                    min_created_on: Time::from_datetime(r.get("min_created_on")),
                    max_created_on: Time::from_datetime(r.get("max_created_on")),
                    artifact_count: r.get("artifact_count"),
                    disaggregation_count: r.get("disaggregation_count"),
                    avg_delivery_attempt: r.get("avg_delivery_attempt"),
                }
            })
            .collect();
        Ok(Page::new(records, limit, offset))
    }
}

fn push_common_filter(qb: &mut QueryBuilder<'_, sqlx::Postgres>, filter: &SearchFilter, source_id: &str) {
    if let Some(lvl) = filter.aggregation_level {
        qb.push(" and f.aggregation_level = ");
        qb.push_bind(aggregation_level_str(lvl));
    }
    if let Some(generation_id) = filter.generation_id {
        qb.push(" and g.generation_id = ");
        qb.push_bind(generation_id);
    } else {
        qb.push(" and g.generation_id = (select max(generation_id) from generation where source_id = ");
        qb.push_bind(source_id.to_string());
        qb.push(")");
    }
    if let Some(external_id) = &filter.external_id {
        qb.push(" and a.external_id = ");
        qb.push_bind(external_id.clone());
    }
}

fn push_common_filter_no_source(qb: &mut QueryBuilder<'_, sqlx::Postgres>, filter: &SearchFilter) {
    if let Some(lvl) = filter.aggregation_level {
        qb.push(" and f.aggregation_level = ");
        qb.push_bind(aggregation_level_str(lvl));
    }
    if let Some(generation_id) = filter.generation_id {
        qb.push(" and g.generation_id = ");
        qb.push_bind(generation_id);
    }
    if let Some(external_id) = &filter.external_id {
        qb.push(" and a.external_id = ");
        qb.push_bind(external_id.clone());
    }
}

fn json_path_to_pg(json_path: &str) -> String {
    json_path.trim_start_matches('$').trim_start_matches('.').to_string()
}

fn aggregation_level_str(level: AggregationLevel) -> &'static str {
    match level {
        AggregationLevel::Document => "DOCUMENT",
        AggregationLevel::Link => "LINK",
        AggregationLevel::Title => "TITLE",
        AggregationLevel::Row => "ROW",
    }
}

fn parse_aggregation_level(s: &str) -> AggregationLevel {
    match s {
        "LINK" => AggregationLevel::Link,
        "TITLE" => AggregationLevel::Title,
        "ROW" => AggregationLevel::Row,
        _ => AggregationLevel::Document,
    }
}

fn disaggregation_status_str(status: DisaggregationStatus) -> &'static str {
    match status {
        DisaggregationStatus::Pending => "PENDING",
        DisaggregationStatus::Done => "DONE",
        DisaggregationStatus::Failed => "FAILED",
    }
}

fn parse_disaggregation_status(s: &str) -> DisaggregationStatus {
    match s {
        "DONE" => DisaggregationStatus::Done,
        "FAILED" => DisaggregationStatus::Failed,
        _ => DisaggregationStatus::Pending,
    }
}

fn row_to_fragment_view(row: &sqlx::postgres::PgRow) -> Result<FragmentView> {
    let aggregation_level: String = row.get("aggregation_level");
    let fragment = Fragment {
        source_id: row.get("source_id"),
        artifact_id: row.get("artifact_id"),
        fragment_id: row.get("fragment_id"),
        seq_no: row.get("seq_no"),
        aggregation_level: parse_aggregation_level(&aggregation_level),
        text_content: row.get("text_content"),
        json_content: row.get("json_content"),
    };
    let relevance: Option<f64> = row.try_get("relevance").ok();
    Ok(FragmentView {
        fragment,
        external_id: row.get("external_id"),
        generation_id: row.get("generation_id"),
        relevance,
    })
}
