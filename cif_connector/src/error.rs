use snafu::Snafu;

/// Errors a [`crate::Connector`] can surface.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("io error reading '{external_id}': {source}"))]
    Io { external_id: String, source: std::io::Error },

    #[snafu(display("object store error reading '{external_id}': {source}"))]
    ObjectStore { external_id: String, source: object_store::Error },

    #[snafu(display("database error: {source}"))]
    Database { source: sqlx::Error },

    #[snafu(display("no artifact found for '{external_id}'"))]
    NotFound { external_id: String },

    #[snafu(display("invalid glob pattern '{pattern}': {source}"))]
    InvalidGlob { pattern: String, source: glob::PatternError },

    #[snafu(display("no prefixes in '{bucket}' matched '{prefix}'"))]
    NoMatchingPrefix { bucket: String, prefix: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for cif_types::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { external_id } => cif_types::Error::not_found("artifact", external_id),
            Error::InvalidGlob { .. } => cif_types::Error::fatal(err.to_string()),
            Error::NoMatchingPrefix { .. } => cif_types::Error::transient(err.to_string()),
            Error::Database { .. } | Error::Io { .. } | Error::ObjectStore { .. } => {
                cif_types::Error::transient(err.to_string())
            }
        }
    }
}
