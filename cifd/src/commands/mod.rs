//! Subcommand registry, grounded on
//! `influxdb_iox/src/commands/run/mod.rs`'s `Config`/`Command`/`command()`
//! triple: one `clap` subcommand per CLI verb, dispatched by an exhaustive
//! `match`.

pub mod check;
pub mod ingestion;
pub mod worker;

use crate::error::Result;
use crate::logging::LogFormat;

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Run one ingestion cycle end-to-end for a source.
    Ingestion(ingestion::Config),

    /// Subscribe to the work queue and process deferred disaggregations
    /// until `TERM`.
    Worker(worker::Config),

    /// Print the build version and exit 0.
    Check(check::Config),
}

impl Command {
    pub fn log_format(&self) -> LogFormat {
        match self {
            Self::Ingestion(config) => config.run_config.log_format,
            Self::Worker(config) => config.run_config.log_format,
            Self::Check(_) => LogFormat::Logfmt,
        }
    }
}

pub async fn command(command: Command) -> Result<()> {
    match command {
        Command::Ingestion(config) => ingestion::command(config).await,
        Command::Worker(config) => worker::command(config).await,
        Command::Check(config) => {
            check::command(config);
            Ok(())
        }
    }
}
