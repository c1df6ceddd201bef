//! Service up/down notifications
//!
//! Published fire-and-forget: each call spawns its own publication and
//! returns immediately. Failures are logged and dropped, so delivery is at
//! most once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::Instance;
use crate::transport::MessagingTransport;

/// Broadcast when an instance registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUp {
    pub instance_id: String,
    pub hostname: String,
    pub service_name: String,
    pub service_version: u64,
    pub az_name: String,
    /// Always empty: events describe whole instances
    pub endpoint_name: String,
    pub sub_topic: Vec<String>,
}

impl From<&Instance> for ServiceUp {
    fn from(inst: &Instance) -> Self {
        Self {
            instance_id: inst.id.clone(),
            hostname: inst.hostname.clone(),
            service_name: inst.name.clone(),
            service_version: inst.version,
            az_name: inst.az_name.clone(),
            endpoint_name: String::new(),
            sub_topic: inst.subscription_topics(),
        }
    }
}

/// Broadcast when an instance is removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDown {
    pub instance_id: String,
    pub hostname: String,
    pub service_name: String,
    pub service_version: u64,
    pub az_name: String,
    pub endpoint_name: String,
}

impl From<&Instance> for ServiceDown {
    fn from(inst: &Instance) -> Self {
        Self {
            instance_id: inst.id.clone(),
            hostname: inst.hostname.clone(),
            service_name: inst.name.clone(),
            service_version: inst.version,
            az_name: inst.az_name.clone(),
            endpoint_name: String::new(),
        }
    }
}

/// Publishes up/down events onto well-known topics
#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn MessagingTransport>,
    up_topic: String,
    down_topic: String,
}

impl EventPublisher {
    /// Create a publisher using `<prefix>.serviceup` / `<prefix>.servicedown`
    pub fn new(transport: Arc<dyn MessagingTransport>, topic_prefix: &str) -> Self {
        Self {
            transport,
            up_topic: format!("{topic_prefix}.serviceup"),
            down_topic: format!("{topic_prefix}.servicedown"),
        }
    }

    pub fn up_topic(&self) -> &str {
        &self.up_topic
    }

    pub fn down_topic(&self) -> &str {
        &self.down_topic
    }

    /// Announce that an instance came up
    pub fn publish_service_up(&self, instance: &Instance) {
        self.publish_async(self.up_topic.clone(), &ServiceUp::from(instance), &instance.id);
    }

    /// Announce that an instance went away
    pub fn publish_service_down(&self, instance: &Instance) {
        self.publish_async(self.down_topic.clone(), &ServiceDown::from(instance), &instance.id);
    }

    fn publish_async<T: Serialize>(&self, topic: String, message: &T, instance_id: &str) {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic = %topic, instance_id, error = %e, "Failed to create event message");
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        let instance_id = instance_id.to_string();
        tokio::spawn(async move {
            match transport.publish(&topic, payload.into()).await {
                Ok(()) => debug!(topic = %topic, instance_id = %instance_id, "Published event"),
                Err(e) => {
                    warn!(
                        topic = %topic,
                        instance_id = %instance_id,
                        error = %e,
                        "Failed to publish event"
                    )
                }
            }
        });
    }
}
