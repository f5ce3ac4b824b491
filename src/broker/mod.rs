#[cfg(feature = "kafka")]
mod kafka;
mod memory;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaPublisher, KafkaSubscriber};
pub use memory::MemoryBroker;
#[cfg(test)]
pub use memory::MemorySubscriber;

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to enqueue message: {0}")]
    Produce(String),
    #[error("Message delivery failed: {0}")]
    Delivery(String),
    #[error("Consume error: {0}")]
    Consume(String),
    #[error("Offset commit failed: {0}")]
    Commit(String)
}

/// Acknowledgement that the broker durably stored a message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64
}

/// Resolves once the broker has acknowledged (or rejected) a published message.
pub type PendingDelivery = Pin<Box<dyn Future<Output = Result<DeliveryReceipt, BrokerError>> + Send>>;

/// A message read from the topic, detached from the client that fetched it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>
}

/// Publishing side of the broker.
pub trait MessagePublisher: Send + Sync + 'static {
    /// Enqueues a message routed by `key`.
    ///
    /// Messages sharing a key land in the same partition, in publish order. The
    /// returned future completes when the broker acknowledges the message; an
    /// `Err` here means the message never left the client.
    fn publish(&self, key: &str, payload: &[u8]) -> Result<PendingDelivery, BrokerError>;
}

/// Consuming side of the broker, bound to one consumer group.
#[async_trait]
pub trait MessageSubscriber: Send + Sync + 'static {
    /// Waits up to `timeout` for the next message. `None` means nothing arrived.
    async fn poll(&self, timeout: Duration) -> Option<Result<BrokerMessage, BrokerError>>;

    /// Durably records `message` as processed for the group.
    async fn commit(&self, message: &BrokerMessage) -> Result<(), BrokerError>;

    /// Moves the read position back so `message` is served again by the next poll.
    async fn rewind(&self, message: &BrokerMessage) -> Result<(), BrokerError>;
}
