mod nats;

pub use nats::NatsQueue;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::message::CrossChainMessage;

/// What a consumer handler decides to do with a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Consume the message; it will not be redelivered.
    Ack,
    /// Redeliver after `delay`.
    Nak { delay: std::time::Duration },
    /// Permanently drop; no further redelivery even if under `max_retries`.
    Terminate,
}

/// A single delivery handed to a consumer-group handler.
pub struct Delivery {
    pub message: CrossChainMessage,
    /// Number of times this message has been delivered so far, including this one.
    pub delivery_count: u64,
}

/// The durable work-queue contract (C3). At-least-once delivery, bounded
/// redelivery, FIFO per subject, no cross-subject ordering.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Durable, ordered per publisher; returns only after the message is
    /// persisted in the queue.
    async fn publish(&self, message: &CrossChainMessage) -> Result<(), QueueError>;

    /// Pulls the next delivery for `group`, if any is currently available.
    /// Within a group each message is delivered to exactly one live consumer.
    async fn next(&self, group: &str) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn nak(&self, delivery: &Delivery, delay: std::time::Duration) -> Result<(), QueueError>;

    async fn terminate(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Current stream depth, used to detect and alert on backlog (`Backlog`).
    async fn depth(&self) -> Result<u64, QueueError>;
}
