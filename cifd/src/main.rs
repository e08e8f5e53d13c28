//! Content Ingestion Framework CLI: `ingestion <source_id>`, `worker
//! [--max-messages N]`, `check`. Grounded on the original's `cif/main.py`
//! (subcommand set, SIGTERM-driven worker shutdown) and
//! `influxdb_iox/src/commands/run/mod.rs` (the `Config`/`Command`/`command()`
//! dispatch shape).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::explicit_iter_loop, clippy::use_self)]

mod clients;
mod commands;
mod error;
mod logging;

use clap::Parser;
use observability_deps::tracing::info;

#[derive(Debug, clap::Parser)]
#[clap(
    name = "cifd",
    about = "Content Ingestion Framework",
    version,
    long_about = "Runs the Content Ingestion Framework's ingestion driver or disaggregation worker.

Configuration is loaded from the following sources (highest precedence first):
        - command line arguments
        - environment variables
        - pre-configured default values"
)]
struct Cli {
    #[clap(subcommand)]
    command: commands::Command,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.command.log_format());

    info!(version = env!("CARGO_PKG_VERSION"), "starting cifd");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    if let Err(err) = runtime.block_on(commands::command(cli.command)) {
        eprintln!("cifd: error: {err}");
        std::process::exit(1);
    }
}
