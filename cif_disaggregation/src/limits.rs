//! Batch-size and concurrency constants governing disaggregation.

/// Fragments inserted per `Catalog::insert_fragments` call.
pub const FRAGMENT_INSERT_BATCH_SIZE: usize = 1_000;

/// Fragment keys inserted per `Catalog::insert_fragment_keys` call.
pub const FRAGMENT_KEY_INSERT_BATCH_SIZE: usize = 2_000;

/// `DeferredDisaggregation` rows persisted per `Catalog::insert_deferred_disaggregations`
/// call, ahead of publishing the corresponding messages.
pub const DEFERRED_PERSIST_BATCH_SIZE: usize = 5_000;

/// Size of the bounded worker pool used by `IMMEDIATE_CHUNKED` dispatch.
pub const CHUNK_WORKER_POOL_SIZE: usize = 3;

/// Default number of lines per chunk for chunked dispatch modes.
pub const DEFAULT_LINES_PER_CHUNK: usize = 50_000;

/// Default page size used to paginate a generation's new artifacts.
pub const DEFAULT_PAGE_LIMIT: i64 = 100;
