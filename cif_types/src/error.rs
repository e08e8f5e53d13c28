//! The error taxonomy shared by the catalog, disaggregation and worker.
//!
//! `§7 Error Handling Design` classifies every failure the core can surface
//! into one of five kinds. Classifying into this enum, rather than letting
//! each layer invent its own errors, is what lets the (out-of-scope) HTTP
//! façade and the worker apply one consistent policy: `NotFound`/`Validation`
//! are terminal, `Timeout`/`Transient` are retryable, `Fatal` aborts startup.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A referenced source, generation, artifact or extractor does not exist.
    #[snafu(display("{what} not found: {id}"))]
    NotFound { what: &'static str, id: String },

    /// Caller input failed validation (unparseable message, malformed
    /// `source_id`, missing required search query, ...).
    #[snafu(display("validation failed: {message}"))]
    Validation { message: String },

    /// A database operation exceeded its deadline.
    #[snafu(display("operation timed out: {message}"))]
    Timeout { message: String },

    /// A transient fault (publish failure, transaction abort) that the
    /// `backoff` crate's retry loop has already given up on.
    #[snafu(display("transient failure, retries exhausted: {message}"))]
    Transient { message: String },

    /// Configuration is missing or the schema does not match expectations;
    /// this should abort startup rather than be handled per-request.
    #[snafu(display("fatal error: {message}"))]
    Fatal { message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { what, id: id.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout { message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal { message: message.into() }
    }

    /// Whether a worker dispatch should nack (redeliver) rather than discard.
    /// Only faults the database client itself could not already resolve via
    /// `backoff` are retryable here; everything else is a terminal discard.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transient { .. })
    }

    /// The HTTP status code the (out-of-scope) query façade maps this error
    /// kind to, per `§6`/`§7`.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation { .. } => 422,
            Self::Timeout { .. } => 504,
            Self::Transient { .. } => 500,
            Self::Fatal { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_retryable_kinds() {
        assert!(Error::timeout("db deadline exceeded").is_retryable());
        assert!(Error::transient("publish failed").is_retryable());
        assert!(!Error::validation("bad source_id").is_retryable());
        assert!(!Error::not_found("artifact", "abc").is_retryable());
        assert!(!Error::fatal("missing config").is_retryable());
    }

    #[test]
    fn maps_to_documented_http_status() {
        assert_eq!(Error::not_found("source", "x").http_status(), 404);
        assert_eq!(Error::validation("bad").http_status(), 422);
        assert_eq!(Error::timeout("slow").http_status(), 504);
    }
}
