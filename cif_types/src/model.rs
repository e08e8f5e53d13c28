//! Shared data model for the Content Ingestion Framework.
//!
//! These types are intentionally thin records -- data access, construction
//! and validation live in `cif_catalog`, `cif_connector`, `cif_extractor` and
//! `cif_worker`. Keeping them here lets every layer of the pipeline agree on
//! one definition of what an artifact, generation or fragment *is*.

use cif_time::Time;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata about the content of an artifact as seen by a [`Connector`], used
/// to detect whether an object has changed since the last time it was staged.
///
/// [`Connector`]: the connector trait, defined in `cif_connector`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub content_type: String,
    pub content_length: i64,
    /// Opaque, connector-defined string that changes iff the underlying
    /// object's content changes (a content hash for the filesystem connector,
    /// an object generation for a blob store connector).
    pub version: String,
}

/// The four supported modes of disaggregation dispatch for a [`Source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisaggregationMode {
    Immediate,
    ImmediateChunked,
    Deferred,
    DeferredChunked,
}

/// A caller-configured filter applied to extracted text content before it is
/// persisted as a fragment's `text_content`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContentFilter {
    /// Whether to include the extractor's shipped base stop-word list.
    #[serde(default = "default_true")]
    pub include_base_stop_words: bool,
    /// Additional caller-specified stop words, merged with the base list.
    #[serde(default)]
    pub additional_stop_words: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Configuration for a [`Connector`] instance, reified by the Factory from a
/// `type` discriminant. See `§9 Design Notes` -- this replaces "source
/// language runtime subclass discovery" with an explicit tagged variant.
///
/// [`Connector`]: the connector trait, defined in `cif_connector`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConnectorConfig {
    Filesystem {
        root: String,
        glob_pattern: String,
    },
    Blob {
        bucket: String,
        glob_pattern: String,
    },
    DynamicPrefixBlob {
        bucket: String,
        glob_pattern: String,
        prefix: String,
    },
    Tabular {
        sql: String,
        key_columns: Vec<String>,
    },
}

/// Configuration for an [`Extractor`] instance, reified by the Factory from a
/// `type` discriminant.
///
/// [`Extractor`]: the extractor trait, defined in `cif_extractor`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtractorConfig {
    #[serde(rename = "HTMLExtractor")]
    Html {
        #[serde(default)]
        text_content_filter: Option<TextContentFilter>,
    },
    #[serde(rename = "HTMLLinkExtractor")]
    HtmlLink {
        #[serde(default)]
        text_content_filter: Option<TextContentFilter>,
    },
    #[serde(rename = "HTMLTitleExtractor")]
    HtmlTitle {
        #[serde(default)]
        text_content_filter: Option<TextContentFilter>,
    },
    #[serde(rename = "CSVRowExtractor")]
    CsvRow {
        #[serde(default)]
        text_content_filter: Option<TextContentFilter>,
    },
}

impl ExtractorConfig {
    /// The canonical string used to identify this extractor kind in
    /// `DeferredDisaggregation.extractor_type` and in worker dispatch.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Html { .. } => "HTMLExtractor",
            Self::HtmlLink { .. } => "HTMLLinkExtractor",
            Self::HtmlTitle { .. } => "HTMLTitleExtractor",
            Self::CsvRow { .. } => "CSVRowExtractor",
        }
    }

    pub fn text_content_filter(&self) -> Option<&TextContentFilter> {
        match self {
            Self::Html { text_content_filter }
            | Self::HtmlLink { text_content_filter }
            | Self::HtmlTitle { text_content_filter }
            | Self::CsvRow { text_content_filter } => text_content_filter.as_ref(),
        }
    }
}

/// A pre-existing, externally configured data source. The core never mutates
/// this record; it is read by `Factory` to reify a `Connector` and the
/// configured `Extractor`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// 32-hex identity of this source.
    pub source_id: String,
    pub external_id: String,
    pub category: String,
    pub created_on: Time,
    pub enabled: bool,
    pub connector_config: ConnectorConfig,
    pub extractor_configs: Vec<ExtractorConfig>,
    pub disaggregation_mode: DisaggregationMode,
    pub retain_generations: u32,
}

/// One immutable, content-addressed object as observed from a source.
///
/// Invariant: for a given `(source_id, external_id, version)` there exists
/// exactly one `artifact_id`, and it never changes once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub source_id: String,
    pub artifact_id: String,
    pub external_id: String,
    pub version: String,
    pub content_type: String,
    pub content_length: i64,
    pub created_on: Time,
}

/// One artifact's membership in a generation: `(source_id, generation_id)` is
/// a set of `artifact_id`s, materialized as one row per member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub source_id: String,
    /// Source-local integer timestamp in microseconds; see `cif_catalog` for
    /// how this is derived from `created_on`.
    pub generation_id: i64,
    pub artifact_id: String,
    pub created_on: Time,
}

/// The aggregation granularity of an extracted [`Fragment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationLevel {
    Document,
    Link,
    Title,
    Row,
}

/// A unit of extracted, searchable text (and optionally structured JSON)
/// derived from one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub source_id: String,
    pub artifact_id: String,
    /// 32-hex token, shared across every fragment produced from the same
    /// extraction task (e.g. every chunk of one disaggregation).
    pub fragment_id: String,
    pub seq_no: i32,
    pub aggregation_level: AggregationLevel,
    pub text_content: String,
    pub json_content: Option<serde_json::Value>,
}

/// A secondary key attached to a fragment, used for keyed lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentKey {
    pub source_id: String,
    pub artifact_id: String,
    pub fragment_id: String,
    pub seq_no: i32,
    pub key: String,
    pub value: String,
}

/// Terminal/pending state of a [`DeferredDisaggregation`] task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisaggregationStatus {
    Pending,
    Done,
    Failed,
}

/// One unit of deferred (message-queue-mediated) disaggregation work: either
/// a whole artifact for one extractor, or one line-bounded chunk of an
/// artifact for one extractor.
///
/// This is the wire format published to, and consumed from, the work queue;
/// `source_id`, `generation_id`, `artifact_id`, `extractor_type`,
/// `fragment_id`, `start_byte` and `end_byte` together form the row's primary
/// key in `deferred_disaggregation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredDisaggregation {
    pub source_id: String,
    pub generation_id: i64,
    pub artifact_id: String,
    pub extractor_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_byte: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_byte: Option<i64>,
    pub created_on: Time,
    pub status: DisaggregationStatus,
    pub delivery_attempt: i32,
}

/// The classification of one `external_id`'s membership across two
/// generations, as produced by [`diff_generations`].
///
/// [`diff_generations`]: the catalog's diff operation, defined in `cif_catalog`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Inserted,
    Deleted,
    Updated,
    /// Present, unchanged, in both generations. Named `Unchanged` rather than
    /// `None` to avoid colliding with `Option::None`; serializes as `"NONE"`
    /// to match the catalog's wire vocabulary.
    #[serde(rename = "NONE")]
    Unchanged,
}

/// One row of a generation diff: the classification of a single `external_id`
/// across generations A and B.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactChange {
    pub external_id: String,
    pub artifact_id_a: Option<String>,
    pub artifact_id_b: Option<String>,
    pub change: ChangeKind,
}

/// A page of query results, as returned by every paginated catalog query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub next_offset: Option<i64>,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, limit: i64, offset: i64) -> Self {
        let next_offset = if records.len() as i64 == limit {
            Some(offset + limit)
        } else {
            None
        };
        Self { records, next_offset }
    }
}

/// A single JSON-path search term: match fragments whose `json_content` at
/// `json_path` is one of `values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSearchTerm {
    pub json_path: String,
    pub values: Vec<serde_json::Value>,
}

/// A single keyed-fragment search term: match fragments carrying a
/// [`FragmentKey`] named `key` with one of `values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySearchTerm {
    pub key: String,
    pub values: Vec<String>,
}

/// Common filters accepted by every fragment-search variant. Replaces the
/// original keyword-spread `**kwargs` with an explicit parameter struct, per
/// `§9 Design Notes`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub aggregation_level: Option<AggregationLevel>,
    pub generation_id: Option<i64>,
    pub external_id: Option<String>,
}

/// A fragment joined with the `external_id` and `generation_id` it belongs
/// to, as returned by every search variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentView {
    pub fragment: Fragment,
    pub external_id: String,
    pub generation_id: i64,
    pub relevance: Option<f64>,
}

/// Aggregated counts of deferred disaggregations grouped by
/// `(source_id, generation_id, status)`, as returned by the admin summary
/// query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredDisaggregationSummary {
    pub source_id: String,
    pub generation_id: i64,
    pub status: DisaggregationStatus,
    pub min_created_on: Time,
    pub max_created_on: Time,
    pub artifact_count: i64,
    pub disaggregation_count: i64,
    pub avg_delivery_attempt: f64,
}

/// Rule specifications for the per-source key-extraction engine. Table-driven
/// per `§9 Design Notes`: a map from `source_id` to one of these, interpreted
/// by one engine rather than an inline cascade of conditionals.
#[derive(Debug, Clone)]
pub enum KeyRule {
    /// Extract `Dxxxx` codes from the `external_id` (filename), restrict the
    /// candidate range to the min/max code found in the filename itself, then
    /// keep codes from `fragment.text_content` that fall in that range.
    AdaFromFilename,
    /// Extract a `DR_dd_dd`-shaped code from the basename of `external_id`,
    /// falling back to the bare basename if the pattern does not match.
    DrFromFilename,
    /// Lift one or more fields out of `fragment.json_content`, renaming each
    /// to the given key name: `(source_json_field, target_key_name)`.
    JsonFields(Vec<(String, String)>),
}

/// A map from `source_id` to the rule(s) used to extract [`FragmentKey`]s
/// from its fragments. See [`KeyRule`].
pub type KeyRuleTable = HashMap<String, Vec<KeyRule>>;
