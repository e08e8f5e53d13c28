use snafu::Snafu;

/// Errors the disaggregation orchestrator can surface.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("catalog error: {source}"))]
    Catalog { source: cif_catalog::Error },

    #[snafu(display("connector error: {source}"))]
    Connector { source: cif_connector::Error },

    #[snafu(display("extractor error: {source}"))]
    Extractor { source: cif_extractor::Error },

    #[snafu(display("work queue error: {source}"))]
    Queue { source: cif_queue::Error },

    #[snafu(display("chunked extraction task panicked: {source}"))]
    Join { source: tokio::task::JoinError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<cif_catalog::Error> for Error {
    fn from(source: cif_catalog::Error) -> Self {
        Self::Catalog { source }
    }
}

impl From<cif_connector::Error> for Error {
    fn from(source: cif_connector::Error) -> Self {
        Self::Connector { source }
    }
}

impl From<cif_extractor::Error> for Error {
    fn from(source: cif_extractor::Error) -> Self {
        Self::Extractor { source }
    }
}

impl From<cif_queue::Error> for Error {
    fn from(source: cif_queue::Error) -> Self {
        Self::Queue { source }
    }
}

impl From<Error> for cif_types::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Catalog { source } => source.into(),
            Error::Connector { source } => source.into(),
            Error::Extractor { source } => source.into(),
            Error::Queue { source } => source.into(),
            Error::Join { .. } => cif_types::Error::transient(err.to_string()),
        }
    }
}
