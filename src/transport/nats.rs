//! NATS client wrapper
//!
//! Provides connection management with credentials and keep-alive, and maps
//! NATS messages onto transport deliveries.

use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::info;

use super::{Delivery, DeliveryStream, MessagingTransport};
use crate::config::NatsArgs;
use crate::types::{DiscoveryError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Default connect timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// NATS client wrapper
#[derive(Clone)]
pub struct NatsClient {
    /// Underlying NATS client
    client: Client,
    /// Client name for logging
    name: String,
}

impl NatsClient {
    /// Create a new NATS client
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        // Fail fast if NATS isn't reachable at startup; reconnection still
        // happens after the first successful connect
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(DEFAULT_CONNECT_TIMEOUT);

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| DiscoveryError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    /// Flush pending messages
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| DiscoveryError::Nats(format!("Flush failed: {}", e)))
    }

    /// Get the client name
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl MessagingTransport for NatsClient {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| DiscoveryError::Nats(format!("Publish failed: {}", e)))
    }

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<()> {
        self.client
            .publish_with_reply(subject.to_string(), reply_to.to_string(), payload)
            .await
            .map_err(|e| DiscoveryError::Nats(format!("Publish failed: {}", e)))
    }

    async fn subscribe(&self, subject: &str) -> Result<DeliveryStream> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| DiscoveryError::Nats(format!("Subscribe failed: {}", e)))?;

        Ok(subscriber
            .map(|msg| Delivery {
                subject: msg.subject.to_string(),
                reply_to: msg.reply.map(|r| r.to_string()),
                payload: msg.payload,
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure_is_nats_error() {
        let args = NatsArgs {
            nats_url: "nats://127.0.0.1:1".to_string(),
            nats_user: None,
            nats_password: None,
        };
        let err = NatsClient::new(&args, "discovery-test").await.err().unwrap();
        assert!(matches!(err, DiscoveryError::Nats(_)));
        assert!(err.to_string().contains("Failed to connect"));
    }
}
