//! In-process message bus
//!
//! Fans each publication out to every live subscriber of the exact subject.
//! Used by tests and by dev mode when no NATS server is around.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::{Delivery, DeliveryStream, MessagingTransport};
use crate::types::{DiscoveryError, Result};

#[derive(Default)]
struct BusState {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>,
    published: Vec<Delivery>,
    failing: bool,
}

/// In-memory pub/sub bus
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live subscribers on a subject
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.lock()
            .subscribers
            .get(subject)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Every message published so far to `subject`
    pub fn published(&self, subject: &str) -> Vec<Delivery> {
        self.lock()
            .published
            .iter()
            .filter(|d| d.subject == subject)
            .cloned()
            .collect()
    }

    /// End every subscription on `subject`, as a broken connection would
    pub fn close_subject(&self, subject: &str) {
        self.lock().subscribers.remove(subject);
    }

    /// Make publications fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn deliver(&self, delivery: Delivery) -> Result<()> {
        let mut state = self.lock();
        if state.failing {
            return Err(DiscoveryError::Nats("bus unavailable".into()));
        }
        if let Some(subs) = state.subscribers.get_mut(&delivery.subject) {
            subs.retain(|tx| tx.send(delivery.clone()).is_ok());
        }
        state.published.push(delivery);
        Ok(())
    }
}

#[async_trait]
impl MessagingTransport for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.deliver(Delivery {
            subject: subject.to_string(),
            reply_to: None,
            payload,
        })
    }

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<()> {
        self.deliver(Delivery {
            subject: subject.to_string(),
            reply_to: Some(reply_to.to_string()),
            payload,
        })
    }

    async fn subscribe(&self, subject: &str) -> Result<DeliveryStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .subscribers
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_subscribers() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("topic").await.unwrap();
        let mut b = bus.subscribe("topic").await.unwrap();

        bus.publish("topic", Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(&a.next().await.unwrap().payload[..], b"hello");
        assert_eq!(&b.next().await.unwrap().payload[..], b"hello");
        assert_eq!(bus.published("topic").len(), 1);
    }

    #[tokio::test]
    async fn test_reply_to_is_carried() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("i1").await.unwrap();
        bus.publish_with_reply("i1", "discovery-x", Bytes::new())
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().reply_to.as_deref(), Some("discovery-x"));
    }

    #[tokio::test]
    async fn test_closed_subject_ends_stream() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("topic").await.unwrap();
        assert_eq!(bus.subscriber_count("topic"), 1);

        bus.close_subject("topic");
        assert!(sub.next().await.is_none());
        assert_eq!(bus.subscriber_count("topic"), 0);
    }

    #[tokio::test]
    async fn test_failing_bus_rejects_publish() {
        let bus = MemoryBus::new();
        bus.set_failing(true);
        assert!(bus.publish("topic", Bytes::new()).await.is_err());
        bus.set_failing(false);
        assert!(bus.publish("topic", Bytes::new()).await.is_ok());
    }
}
