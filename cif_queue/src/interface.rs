use async_trait::async_trait;

use crate::Result;

/// One message pulled off the queue, carrying the opaque token needed to
/// [`WorkQueue::ack`] or [`WorkQueue::nack`] it.
#[derive(Debug)]
pub struct Delivery {
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery following a nack.
    pub delivery_attempt: i32,
    pub(crate) token: u64,
}

/// The message bus Disaggregation publishes to and Worker consumes from.
///
/// Grounded on the original's `PubSupport`/`SubSupport` pair, generalized off
/// GCP Pub/Sub specifics into a trait seam: `publish` is the `PubSupport`
/// side, `receive`/`ack`/`nack` replace `SubSupport`'s callback-driven
/// `start`/`stop` with an explicit pull loop, which composes more simply with
/// `tokio` cancellation than a blocking callback thread would.
#[async_trait]
pub trait WorkQueue: std::fmt::Debug + Send + Sync {
    /// Publish every payload as its own message. Returns once every publish
    /// has been acknowledged by the bus (or failed).
    async fn publish(&self, payloads: Vec<Vec<u8>>) -> Result<()>;

    /// Pull up to `max_messages` currently available messages. May return
    /// fewer, including zero, if none are available.
    async fn receive(&self, max_messages: usize) -> Result<Vec<Delivery>>;

    /// Acknowledge successful processing; the message will not be redelivered.
    async fn ack(&self, delivery: Delivery) -> Result<()>;

    /// Signal failed processing; the message becomes available for
    /// redelivery with `delivery_attempt` incremented.
    async fn nack(&self, delivery: Delivery) -> Result<()>;
}
