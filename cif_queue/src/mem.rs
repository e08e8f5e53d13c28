use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use observability_deps::tracing::info;
use parking_lot::Mutex;

use crate::error::UnknownDeliverySnafu;
use crate::interface::{Delivery, WorkQueue};
use crate::Result;
use snafu::ensure;

struct Message {
    payload: Vec<u8>,
    delivery_attempt: i32,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Message>,
    in_flight: HashMap<u64, Message>,
    next_token: u64,
}

/// An in-process [`WorkQueue`], suitable for tests and for running the
/// worker and disaggregation in a single process without an external bus.
#[derive(Debug, Default)]
pub struct InMemoryWorkQueue {
    state: Mutex<State>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages neither delivered nor acknowledged.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn publish(&self, payloads: Vec<Vec<u8>>) -> Result<()> {
        let mut state = self.state.lock();
        let count = payloads.len();
        for payload in payloads {
            state.pending.push_back(Message { payload, delivery_attempt: 0 });
        }
        info!(count, "published messages to in-memory queue");
        Ok(())
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<Delivery>> {
        let mut state = self.state.lock();
        let mut deliveries = Vec::new();
        for _ in 0..max_messages {
            let Some(mut message) = state.pending.pop_front() else {
                break;
            };
            message.delivery_attempt += 1;
            let token = state.next_token;
            state.next_token += 1;
            deliveries.push(Delivery {
                payload: message.payload.clone(),
                delivery_attempt: message.delivery_attempt,
                token,
            });
            state.in_flight.insert(token, message);
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: Delivery) -> Result<()> {
        let mut state = self.state.lock();
        ensure!(state.in_flight.remove(&delivery.token).is_some(), UnknownDeliverySnafu);
        Ok(())
    }

    async fn nack(&self, delivery: Delivery) -> Result<()> {
        let mut state = self.state.lock();
        let message = state.in_flight.remove(&delivery.token);
        ensure!(message.is_some(), UnknownDeliverySnafu);
        state.pending.push_front(message.expect("checked above"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_receive_roundtrips_payload() {
        let queue = InMemoryWorkQueue::new();
        queue.publish(vec![b"hello".to_vec()]).await.unwrap();
        let deliveries = queue.receive(10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].payload, b"hello");
        assert_eq!(deliveries[0].delivery_attempt, 1);
    }

    #[tokio::test]
    async fn receive_respects_max_messages() {
        let queue = InMemoryWorkQueue::new();
        queue.publish(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]).await.unwrap();
        let deliveries = queue.receive(2).await.unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn ack_removes_message_permanently() {
        let queue = InMemoryWorkQueue::new();
        queue.publish(vec![b"hello".to_vec()]).await.unwrap();
        let mut deliveries = queue.receive(1).await.unwrap();
        let delivery = deliveries.remove(0);
        queue.ack(delivery).await.unwrap();
        assert_eq!(queue.receive(1).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempt() {
        let queue = InMemoryWorkQueue::new();
        queue.publish(vec![b"hello".to_vec()]).await.unwrap();
        let mut deliveries = queue.receive(1).await.unwrap();
        let delivery = deliveries.remove(0);
        assert_eq!(delivery.delivery_attempt, 1);
        queue.nack(delivery).await.unwrap();

        let mut redelivered = queue.receive(1).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        let delivery = redelivered.remove(0);
        assert_eq!(delivery.delivery_attempt, 2);
        queue.ack(delivery).await.unwrap();
    }

    #[tokio::test]
    async fn ack_of_unknown_token_is_an_error() {
        let queue = InMemoryWorkQueue::new();
        let bogus = Delivery { payload: vec![], delivery_attempt: 1, token: 999 };
        assert!(queue.ack(bogus).await.is_err());
    }
}
