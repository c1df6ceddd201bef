//! Instances registered through this process
//!
//! ## Protocol
//!
//! 1. `register` creates an ephemeral node for the instance and starts a
//!    [`HeartbeatMonitor`] for it
//! 2. Every interval the sender pings each healthy instance with a reply-to
//!    naming this registry's own subscription (`discovery-<uuid>`)
//! 3. The receiver consumes replies and beats the matching monitor
//! 4. Instances silent for longer than the max-silence window are evicted:
//!    node deleted, monitor dropped, service-down event published
//!
//! Only heartbeat state lives here. Full records for down events come from
//! the region cache through [`InstanceLookup`].

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::events::EventPublisher;
use super::region::InstanceLookup;
use super::types::Instance;
use crate::config::RegistryConfig;
use crate::coordination::{child_path, CoordinationClient, CoordinationError, CreateMode};
use crate::heartbeat::{HeartbeatMonitor, PING_PAYLOAD};
use crate::supervisor::{FatalSignal, Shutdown};
use crate::transport::MessagingTransport;
use crate::types::{DiscoveryError, Result};

/// Registry of instances owned by this process
pub struct LocalRegistry {
    /// Our subscription name, used as reply-to on pings
    id: String,
    hostname: String,
    config: RegistryConfig,
    store: Arc<dyn CoordinationClient>,
    transport: Arc<dyn MessagingTransport>,
    lookup: Arc<dyn InstanceLookup>,
    events: EventPublisher,
    monitors: RwLock<HashMap<String, Arc<HeartbeatMonitor>>>,
}

impl LocalRegistry {
    /// Create a registry with a freshly generated `discovery-<uuid>` id
    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn CoordinationClient>,
        transport: Arc<dyn MessagingTransport>,
        lookup: Arc<dyn InstanceLookup>,
    ) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let events = EventPublisher::new(Arc::clone(&transport), &config.topic_prefix);

        Self {
            id: format!("discovery-{}", uuid::Uuid::new_v4()),
            hostname,
            config,
            store,
            transport,
            lookup,
            events,
            monitors: RwLock::new(HashMap::new()),
        }
    }

    /// This registry's subscription name
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host this registry runs on
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Make sure the root node exists, retrying a bounded number of times
    pub async fn ensure_root(&self) -> Result<()> {
        let root = &self.config.root_path;
        info!(hostname = %self.hostname, "Initialising local registry");

        let mut attempts = 0;
        loop {
            let err = match self.store.exists(root).await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    info!(root = %root, "Creating root node");
                    match self
                        .store
                        .create(root, Vec::new(), CreateMode::Persistent)
                        .await
                    {
                        Ok(()) | Err(CoordinationError::NodeExists(_)) => return Ok(()),
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            attempts += 1;
            if attempts >= self.config.init_attempts {
                return Err(DiscoveryError::Startup(format!(
                    "Failed to check/create root node {} after {} attempts: {}",
                    root, attempts, err
                )));
            }
            warn!(
                root = %root,
                error = %err,
                "Failed to check/create root node, retrying in {:?}",
                self.config.init_delay
            );
            tokio::time::sleep(self.config.init_delay).await;
        }
    }

    /// Register an instance owned by this process
    ///
    /// Registering an id whose node already exists is treated as a replay
    /// and succeeds. Concurrent registrations of the same id are decided by
    /// whoever creates the node first; the rest see it as already present.
    pub async fn register(&self, instance: &Instance) -> Result<()> {
        let document = instance.to_document().map_err(|e| {
            DiscoveryError::Registration(format!("Failed to marshal instance JSON: {}", e))
        })?;

        let path = instance.node_path(&self.config.root_path);
        match self
            .store
            .create(&path, document, CreateMode::Ephemeral)
            .await
        {
            Ok(()) => {}
            Err(CoordinationError::NodeExists(_)) => {
                debug!(instance_id = %instance.id, "Node already exists, treating as replay");
            }
            Err(e) => {
                return Err(DiscoveryError::Registration(format!(
                    "Failed to add {} to local registry: {}",
                    instance.id, e
                )))
            }
        }

        let monitor = HeartbeatMonitor::new(instance.id.clone(), self.config.max_silence);
        self.monitors
            .write()
            .await
            .insert(instance.id.clone(), Arc::new(monitor));

        info!(
            instance_id = %instance.id,
            service = %instance.name,
            version = instance.version,
            "Registered instance"
        );
        self.events.publish_service_up(instance);
        Ok(())
    }

    /// Remove an instance, by id
    ///
    /// Deleting a node that is already gone is a replay and succeeds. The
    /// down event is only sent when this call deleted the node and the
    /// region cache knew the instance.
    pub async fn unregister(&self, instance_id: &str) -> Result<()> {
        let instance = self.lookup.single_instance(instance_id).await;

        let path = child_path(&self.config.root_path, instance_id);
        let deleted = match self.store.delete(&path).await {
            Ok(()) => true,
            Err(CoordinationError::NoNode(_)) => {
                debug!(instance_id, "Node already gone, treating as replay");
                false
            }
            Err(e) => return Err(e.into()),
        };

        self.monitors.write().await.remove(instance_id);

        if deleted {
            info!(instance_id, "Unregistered instance");
            if let Some(instance) = instance {
                self.events.publish_service_down(&instance);
            }
        }
        Ok(())
    }

    /// Whether this process tracks a heartbeat for `instance_id`
    pub async fn is_monitored(&self, instance_id: &str) -> bool {
        self.monitors.read().await.contains_key(instance_id)
    }

    /// Ids of instances this process tracks
    pub async fn monitored_ids(&self) -> Vec<String> {
        self.monitors.read().await.keys().cloned().collect()
    }

    /// Record a heartbeat reply from `instance_id`; unknown ids are ignored
    pub async fn handle_heartbeat(&self, instance_id: &str) -> bool {
        let monitor = self.monitors.read().await.get(instance_id).cloned();
        match monitor {
            Some(monitor) => {
                monitor.beat();
                true
            }
            None => false,
        }
    }

    /// One sender tick: evict the unhealthy, ping the healthy
    pub async fn send_heartbeats(self: &Arc<Self>) {
        let alive: Vec<Arc<HeartbeatMonitor>> =
            self.monitors.read().await.values().cloned().collect();

        debug!("Sending heartbeats to {} instances", alive.len());

        for monitor in alive {
            if !monitor.healthy() {
                info!(instance_id = %monitor.id(), "Instance missed heartbeats, evicting");
                let registry = Arc::clone(self);
                let instance_id = monitor.id().to_string();
                tokio::spawn(async move {
                    if let Err(e) = registry.unregister(&instance_id).await {
                        warn!(instance_id = %instance_id, error = %e, "Failed to evict instance");
                    }
                });
                continue;
            }

            if let Err(e) = self
                .transport
                .publish_with_reply(monitor.id(), &self.id, Bytes::from_static(PING_PAYLOAD))
                .await
            {
                warn!(instance_id = %monitor.id(), error = %e, "Error sending heartbeat");
            }
        }
    }

    /// Send heartbeats every interval until shutdown
    pub async fn run_sender(self: Arc<Self>, mut shutdown: Shutdown) {
        info!(
            "Starting heartbeat sender (interval: {:?}, max silence: {:?})",
            self.config.heartbeat_interval, self.config.max_silence
        );

        let start = tokio::time::Instant::now() + self.config.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(start, self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Heartbeat sender stopped");
                    return;
                }
                _ = ticker.tick() => self.send_heartbeats().await,
            }
        }
    }

    /// Consume heartbeat replies until shutdown
    ///
    /// If the subscription cannot be opened or its stream ends, liveness can
    /// no longer be judged and the supervisor is told.
    pub async fn run_receiver(self: Arc<Self>, mut shutdown: Shutdown, fatal: FatalSignal) {
        let mut deliveries = match self.transport.subscribe(&self.id).await {
            Ok(stream) => stream,
            Err(e) => {
                fatal.raise(
                    "heartbeat-receiver",
                    format!("Failed to consume from {}: {}", self.id, e),
                );
                return;
            }
        };
        info!(subscription = %self.id, "Listening for heartbeats");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Heartbeat receiver stopped");
                    return;
                }
                next = deliveries.next() => {
                    let Some(delivery) = next else {
                        fatal.raise(
                            "heartbeat-receiver",
                            format!("Heartbeat stream {} closed", self.id),
                        );
                        return;
                    };
                    if let Some(reply_to) = delivery.reply_to.as_deref() {
                        self.handle_heartbeat(reply_to).await;
                    }
                }
            }
        }
    }
}
