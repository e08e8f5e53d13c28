//! `check` -- prints the build version and exits 0. A no-op task used for
//! verifying client configuration, grounded on the original's `do_check`
//! (`logger.info(f"OK {calc_version()}")`).

use observability_deps::tracing::info;

#[derive(Debug, clap::Parser)]
pub struct Config {}

pub fn command(_config: Config) {
    let version = env!("CARGO_PKG_VERSION");
    info!("OK {version}");
    println!("cifd {version}");
}
