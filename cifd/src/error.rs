//! Command-level error type. Matches `influxdb_iox/src/commands/run/test.rs`'s
//! `thiserror`-derived, per-subcommand `Error` enum: `cif_types::Error` (and
//! every crate-local `snafu` error it wraps) surfaces here as one variant per
//! failure-prone boundary, rather than being re-classified again.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to connect to catalog database: {0}")]
    CatalogConnect(#[source] cif_catalog::Error),

    #[error("failed to run catalog migrations: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    #[error("unsupported work queue URL '{0}': only the memory:// scheme is wired up")]
    UnsupportedWorkQueue(String),

    #[error(transparent)]
    Core(#[from] cif_types::Error),

    #[error("worker shut down while handling in-flight messages: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
