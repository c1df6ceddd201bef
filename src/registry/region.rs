//! Region-wide instance cache
//!
//! Watches the children of the registry root and keeps a full copy of every
//! instance document in the region. The cache is eventually consistent: it
//! lags the store by one watch delivery.
//!
//! An instance id never changes meaning, so a document is fetched once when
//! its id first appears and dropped when the id leaves the children list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::{Instance, Instances};
use crate::coordination::{child_path, CoordinationClient, CoordinationError};
use crate::supervisor::{FatalSignal, Shutdown};
use crate::types::{DiscoveryError, Result};

/// Read-only point lookup of full instance records
#[async_trait]
pub trait InstanceLookup: Send + Sync {
    /// Full record for `id`, if known
    async fn single_instance(&self, id: &str) -> Option<Instance>;
}

/// Cached view of every instance in the region
pub struct RegionRegistry {
    root: String,
    store: Arc<dyn CoordinationClient>,
    instances: RwLock<HashMap<String, Instance>>,
}

impl RegionRegistry {
    /// Create an empty cache over `root`
    pub fn new(root: impl Into<String>, store: Arc<dyn CoordinationClient>) -> Self {
        Self {
            root: root.into(),
            store,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of all instances, safe to use without holding any lock
    pub async fn all_instances(&self) -> Instances {
        self.instances.read().await.values().cloned().collect()
    }

    /// Number of cached instances
    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Reconcile the cache with the current children list
    ///
    /// Documents for new ids are fetched without holding the lock; the
    /// write lock only covers the final map update.
    pub async fn sync(&self, instance_ids: &[String]) -> Result<()> {
        let missing: Vec<String> = {
            let instances = self.instances.read().await;
            instance_ids
                .iter()
                .filter(|id| !instances.contains_key(*id))
                .cloned()
                .collect()
        };

        let mut fetched = Vec::with_capacity(missing.len());
        for id in missing {
            let data = self.store.get(&child_path(&self.root, &id)).await?;
            let instance = Instance::from_document(&data).map_err(|e| {
                DiscoveryError::Serialization(format!("Bad instance document {}: {}", id, e))
            })?;
            fetched.push((id, instance));
        }

        let seen: HashSet<&String> = instance_ids.iter().collect();
        let mut instances = self.instances.write().await;
        let added = fetched.len();
        instances.extend(fetched);
        let before = instances.len();
        instances.retain(|id, _| seen.contains(id));
        let removed = before - instances.len();

        if added > 0 || removed > 0 {
            debug!(added, removed, total = instances.len(), "Region cache synced");
        }
        Ok(())
    }

    /// Keep the cache in sync until shutdown
    ///
    /// Any read, decode or watch failure is fatal: the cache can no longer
    /// be trusted, so the supervisor is told and the loop stops.
    pub async fn run_syncer(self: Arc<Self>, mut shutdown: Shutdown, fatal: FatalSignal) {
        info!(root = %self.root, "Launching region syncer");
        loop {
            let (instance_ids, watch) = match self.store.children_watch(&self.root).await {
                Ok(pair) => pair,
                Err(e) => {
                    fatal.raise("region-syncer", format!("Failed to read children: {}", e));
                    return;
                }
            };

            if let Err(e) = self.sync(&instance_ids).await {
                fatal.raise("region-syncer", format!("Failed to sync instances: {}", e));
                return;
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Region syncer stopped");
                    return;
                }
                event = watch => match event {
                    Ok(event) => debug!(?event, "Watch triggered"),
                    Err(_) => {
                        let closed = CoordinationError::WatchClosed(self.root.clone());
                        fatal.raise("region-syncer", closed.to_string());
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl InstanceLookup for RegionRegistry {
    async fn single_instance(&self, id: &str) -> Option<Instance> {
        self.instances.read().await.get(id).cloned()
    }
}
