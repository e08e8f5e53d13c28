//! Batch-size and timing constants governing catalog writes and reads.

use std::time::Duration;

/// Upper bound on the number of artifacts staged per `insert_stage_batch`
/// call, and consequently the number of rows the promotion transaction
/// touches per call to `insert_artifact_generation_batch`.
///
/// The original Spanner-backed implementation derived this from an 80,000
/// mutation-per-transaction ceiling divided by 14 mutations/row for the
/// promotion transaction's schema. Postgres has no equivalent fixed mutation
/// ceiling, but this reimplementation keeps the same reference constant as a
/// conservative default bound on transaction size and lock duration; it
/// should be re-tuned against the concrete schema and transaction isolation
/// level in use, per `DESIGN.md`'s Open Question 2.
pub const STAGING_BATCH_SIZE: usize = 6_153;

/// Default per-query deadline (spec.md §5: "Each database query carries a
/// default 30-second deadline"). Overridable via [`PostgresCatalog::connect_with_timeout`]
/// or [`PostgresCatalog::new_with_timeout`], wired up from `CIF_QUERY_TIMEOUT_SECS`
/// by `cifd`.
///
/// [`PostgresCatalog::connect_with_timeout`]: crate::postgres::PostgresCatalog::connect_with_timeout
/// [`PostgresCatalog::new_with_timeout`]: crate::postgres::PostgresCatalog::new_with_timeout
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on local retry attempts for one transient-fault-classified
/// database operation, before escalating to `cif_types::Error::Transient`
/// (spec.md §7: "retried by the library below; escalated as 500 if
/// exhausted").
pub const MAX_TRANSIENT_RETRIES: u32 = 3;
