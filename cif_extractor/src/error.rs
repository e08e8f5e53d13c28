use snafu::Snafu;

/// Errors an [`crate::Extractor`] can surface.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("connector error reading '{external_id}': {source}"))]
    Connector { external_id: String, source: cif_connector::Error },

    #[snafu(display("artifact '{external_id}' is not valid utf-8: {source}"))]
    InvalidUtf8 { external_id: String, source: std::str::Utf8Error },

    #[snafu(display("artifact '{external_id}' has no <title>"))]
    MissingTitle { external_id: String },

    #[snafu(display("csv error reading '{external_id}': {source}"))]
    Csv { external_id: String, source: csv::Error },

    #[snafu(display("artifact '{external_id}' has no csv header row"))]
    MissingCsvHeader { external_id: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for cif_types::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Connector { source, .. } => source.into(),
            Error::InvalidUtf8 { .. } | Error::MissingTitle { .. } | Error::MissingCsvHeader { .. } | Error::Csv { .. } => {
                cif_types::Error::validation(err.to_string())
            }
        }
    }
}
