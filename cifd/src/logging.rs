//! `tracing-subscriber` bootstrap, selected by `CIF_LOG_FORMAT` (spec.md's
//! ambient logging stack, per `SPEC_FULL.md` §3.1). No separate crate wraps
//! this the way the teacher's `trogging` does -- CIF only needs two output
//! shapes, so `cifd` owns the subscriber directly.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ArgEnum)]
#[clap(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable `key=value` lines.
    Logfmt,
    /// One JSON object per line, for log-shipping pipelines.
    Json,
}

/// Installs the global subscriber. `RUST_LOG` (or `CIF_LOG` if unset)
/// controls verbosity per the usual `tracing_subscriber::EnvFilter` syntax,
/// defaulting to `info`.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("CIF_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter);
    match format {
        LogFormat::Logfmt => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
