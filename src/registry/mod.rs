//! Service registry
//!
//! [`LocalRegistry`] owns instances registered through this process and the
//! heartbeat protocol that keeps them alive. [`RegionRegistry`] mirrors every
//! instance in the region from the coordination store. [`Registry`] wires the
//! two together and runs their background loops under a [`Supervisor`].

pub mod events;
pub mod local;
pub mod region;
pub mod types;

pub use events::{EventPublisher, ServiceDown, ServiceUp};
pub use local::LocalRegistry;
pub use region::{InstanceLookup, RegionRegistry};
pub use types::{
    matching_az, matching_service, matching_service_prefix, Endpoint, Filter, Instance, Instances,
    Sla,
};

use std::sync::Arc;

use tracing::info;

use crate::config::RegistryConfig;
use crate::coordination::CoordinationClient;
use crate::supervisor::Supervisor;
use crate::transport::MessagingTransport;
use crate::types::Result;

/// Handle shared by every consumer of the registry
pub struct Registry {
    local: Arc<LocalRegistry>,
    region: Arc<RegionRegistry>,
}

impl Registry {
    /// Build both registries without starting anything
    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn CoordinationClient>,
        transport: Arc<dyn MessagingTransport>,
    ) -> Self {
        let region = Arc::new(RegionRegistry::new(
            config.root_path.clone(),
            Arc::clone(&store),
        ));
        let lookup: Arc<dyn InstanceLookup> = region.clone();
        let local = Arc::new(LocalRegistry::new(config, store, transport, lookup));
        Self { local, region }
    }

    /// Bootstrap the root node and launch the background loops
    ///
    /// Fails with a startup error when the root node cannot be prepared.
    pub async fn start(
        config: RegistryConfig,
        store: Arc<dyn CoordinationClient>,
        transport: Arc<dyn MessagingTransport>,
        supervisor: &Supervisor,
    ) -> Result<Arc<Self>> {
        let registry = Arc::new(Self::new(config, store, transport));
        registry.local.ensure_root().await?;

        supervisor.spawn(
            "heartbeat-receiver",
            Arc::clone(&registry.local)
                .run_receiver(supervisor.shutdown_signal(), supervisor.fatal_signal()),
        );
        supervisor.spawn(
            "heartbeat-sender",
            Arc::clone(&registry.local).run_sender(supervisor.shutdown_signal()),
        );
        supervisor.spawn(
            "region-syncer",
            Arc::clone(&registry.region)
                .run_syncer(supervisor.shutdown_signal(), supervisor.fatal_signal()),
        );

        info!(
            registry_id = %registry.local.id(),
            hostname = registry.local.hostname(),
            "Registry started"
        );
        Ok(registry)
    }

    /// Register an instance through this process
    pub async fn register(&self, instance: &Instance) -> Result<()> {
        self.local.register(instance).await
    }

    /// Remove an instance, by id
    pub async fn unregister(&self, instance_id: &str) -> Result<()> {
        self.local.unregister(instance_id).await
    }

    /// Snapshot of every instance in the region
    pub async fn all_instances(&self) -> Instances {
        self.region.all_instances().await
    }

    /// Full record for one instance, if the region cache has it
    pub async fn single_instance(&self, instance_id: &str) -> Option<Instance> {
        self.region.single_instance(instance_id).await
    }

    pub fn local(&self) -> &Arc<LocalRegistry> {
        &self.local
    }

    pub fn region(&self) -> &Arc<RegionRegistry> {
        &self.region
    }
}
