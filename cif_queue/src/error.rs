use snafu::Snafu;

/// Errors a [`crate::WorkQueue`] can surface.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("message payload is not valid json: {source}"))]
    Envelope { source: serde_json::Error },

    #[snafu(display("publish failed: {message}"))]
    Publish { message: String },

    #[snafu(display("delivery token is unknown or already resolved"))]
    UnknownDelivery,

    #[snafu(display("subscriber is already started"))]
    AlreadyStarted,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for cif_types::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Envelope { .. } => cif_types::Error::validation(err.to_string()),
            Error::Publish { .. } => cif_types::Error::transient(err.to_string()),
            Error::UnknownDelivery | Error::AlreadyStarted => cif_types::Error::fatal(err.to_string()),
        }
    }
}
