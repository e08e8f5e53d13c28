//! `worker [--max-messages N]` -- subscribes to the work queue and processes
//! deferred disaggregations until `TERM`, grounded on the original's
//! `do_worker`: a `Worker` driven by `factory.clients.sub.start(...,
//! max_messages=...)`, generalized onto an explicit pull loop (spec.md §5
//! "Cancellation": in-flight handlers are allowed to complete; there is no
//! cooperative cancellation of long extractions).

use std::sync::Arc;
use std::time::Duration;

use cif_worker::{DisaggregationFactory, Worker};
use metric::Registry;
use observability_deps::tracing::info;
use tokio::signal::unix::{signal, SignalKind};

use crate::clients::RunConfig;
use crate::error::Result;

#[derive(Debug, clap::Parser)]
pub struct Config {
    #[clap(flatten)]
    pub run_config: RunConfig,

    /// Maximum number of messages the subscription pulls per poll (flow
    /// control), overriding `CIF_WORK_QUEUE_MAX_MESSAGES`.
    #[clap(short = 'm', long = "max-messages", env = "CIF_WORK_QUEUE_MAX_MESSAGES", default_value = "1")]
    pub max_messages: usize,

    /// Poll interval when the queue has nothing to deliver.
    #[clap(long = "idle-poll-millis", default_value = "500")]
    pub idle_poll_millis: u64,
}

pub async fn command(config: Config) -> Result<()> {
    let clients = config.run_config.build_clients().await?;
    let metrics = Arc::new(Registry::new());
    let factory: Arc<dyn DisaggregationFactory> = Arc::new(cif_factory::Factory::new(
        clients.clone(),
        Arc::clone(&metrics),
        Arc::new(cif_time::SystemProvider::new()),
    ));
    let worker = Worker::new(Arc::clone(&clients.catalog), Arc::clone(&clients.queue), factory, &metrics);

    let mut terminate = signal(SignalKind::terminate()).map_err(|err| crate::error::Error::Config(err.to_string()))?;
    info!(max_messages = config.max_messages, "worker started, waiting for messages");

    loop {
        tokio::select! {
            biased;
            _ = terminate.recv() => {
                info!("received TERM, stopping subscription (in-flight handlers allowed to complete)");
                break;
            }
            pulled = worker.run_once(config.max_messages) => {
                let pulled = pulled?;
                if pulled == 0 {
                    tokio::time::sleep(Duration::from_millis(config.idle_poll_millis)).await;
                }
            }
        }
    }

    info!("worker stopped");
    Ok(())
}
