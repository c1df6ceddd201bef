//! Messaging transport
//!
//! Best-effort pub/sub used for heartbeat pings, up/down notifications and
//! the RPC surface. Deliveries carry an optional reply-to so a receiver can
//! route an answer back to the sender's own subscription.

pub mod memory;
pub mod nats;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::types::Result;

pub use memory::MemoryBus;
pub use nats::NatsClient;

/// A message received from a subscription
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Subject the message was published to
    pub subject: String,
    /// Where the sender expects replies
    pub reply_to: Option<String>,
    /// Raw payload
    pub payload: Bytes,
}

/// Stream of deliveries; ends when the transport drops the subscription
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Fire-and-forget publication plus exclusive subscriptions
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Publish a message to a topic
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Publish a message carrying a reply-to address
    async fn publish_with_reply(&self, subject: &str, reply_to: &str, payload: Bytes)
        -> Result<()>;

    /// Subscribe to a subject
    async fn subscribe(&self, subject: &str) -> Result<DeliveryStream>;
}
