use snafu::Snafu;

/// Errors the catalog's data access layer can surface. Callers convert these
/// into [`cif_types::Error`] at the boundary where a retry/discard decision
/// is made (the worker, the disaggregation orchestrator).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("database error: {source}"))]
    Database { source: sqlx::Error },

    #[snafu(display("{what} not found: {id}"))]
    NotFound { what: &'static str, id: String },

    #[snafu(display("invalid source_id '{source_id}': must be 32 hex characters"))]
    InvalidSourceId { source_id: String },

    #[snafu(display("{message}"))]
    Validation { message: String },

    /// A single query exceeded its per-query deadline (spec.md §5); the
    /// query itself may still be running server-side, but the caller gives
    /// up waiting on it.
    #[snafu(display("query timed out: {message}"))]
    Timeout { message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Database { source }
    }
}

impl Error {
    /// Whether this is a known-transient database fault worth retrying
    /// locally (spec.md §7: "recovers locally only from known transient
    /// faults during DB transactions"), as opposed to one that should
    /// propagate immediately.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Self::Database { source } => is_transient_sqlx_error(source),
            _ => false,
        }
    }
}

/// Connection-level faults and the Postgres error codes for serialization
/// failures/deadlocks, which a local retry can reasonably expect to clear on
/// its own without operator intervention.
fn is_transient_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("40001") | Some("40P01") | Some("08000") | Some("08003") | Some("08006"))
        }
        _ => false,
    }
}

impl From<Error> for cif_types::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Database { source } => match &source {
                sqlx::Error::PoolTimedOut => cif_types::Error::timeout(source.to_string()),
                _ => cif_types::Error::transient(source.to_string()),
            },
            Error::NotFound { what, id } => cif_types::Error::not_found(what, id),
            Error::InvalidSourceId { source_id } => {
                cif_types::Error::validation(format!("invalid source_id '{source_id}'"))
            }
            Error::Validation { message } => cif_types::Error::validation(message),
            Error::Timeout { message } => cif_types::Error::timeout(message),
        }
    }
}
