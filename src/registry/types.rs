//! Registry data model
//!
//! An [`Instance`] is one running copy of a service on one host. Its JSON
//! form is the document stored in the coordination store, so field names
//! are fixed and shared by every discovery process in the region.

use serde::{Deserialize, Serialize};

use crate::coordination::child_path;

/// Response-time promise for an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Sla {
    /// Mean response time
    pub mean: u32,
    /// 95th percentile response time
    pub upper95: u32,
}

/// One operation or subscription exposed by an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Endpoint {
    pub name: String,
    /// Topic name for subscription endpoints, empty otherwise
    pub subscribe: String,
    pub sla: Sla,
}

/// A single running version of a service on a single host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Instance {
    pub id: String,
    pub hostname: String,
    pub machine_class: String,
    pub name: String,
    pub description: String,
    pub az_name: String,
    pub source: String,
    pub owner_email: String,
    pub owner_mobile: String,
    pub owner_team: String,
    pub version: u64,
    pub endpoints: Vec<Endpoint>,
}

impl Instance {
    /// Subscription topics of this instance's endpoints (non-empty only)
    pub fn subscription_topics(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .filter(|ep| !ep.subscribe.is_empty())
            .map(|ep| ep.subscribe.clone())
            .collect()
    }

    /// Coordination store path for this instance under `root`
    pub fn node_path(&self, root: &str) -> String {
        child_path(root, &self.id)
    }

    /// Serialize to the stored JSON document
    pub fn to_document(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize a stored JSON document
    pub fn from_document(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Predicate returning `true` when an instance should be filtered out
pub type Filter = Box<dyn Fn(&Instance) -> bool + Send + Sync>;

/// Keep only instances whose service name starts with `prefix`
pub fn matching_service_prefix(prefix: impl Into<String>) -> Filter {
    let prefix = prefix.into();
    Box::new(move |inst| !inst.name.starts_with(&prefix))
}

/// Keep only instances of exactly this service
pub fn matching_service(name: impl Into<String>) -> Filter {
    let name = name.into();
    Box::new(move |inst| inst.name != name)
}

/// Keep only instances in this availability zone
pub fn matching_az(az: impl Into<String>) -> Filter {
    let az = az.into();
    Box::new(move |inst| inst.az_name != az)
}

/// An independent list of instances, detached from any registry lock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instances(Vec<Instance>);

impl Instances {
    /// New list containing the instances the filter keeps
    pub fn filter(&self, filter: &Filter) -> Instances {
        self.0.iter().filter(|inst| !filter(inst)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instance> {
        self.0.iter()
    }
}

impl From<Vec<Instance>> for Instances {
    fn from(instances: Vec<Instance>) -> Self {
        Self(instances)
    }
}

impl FromIterator<Instance> for Instances {
    fn from_iter<T: IntoIterator<Item = Instance>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Instances {
    type Item = Instance;
    type IntoIter = std::vec::IntoIter<Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Instances {
    type Item = &'a Instance;
    type IntoIter = std::slice::Iter<'a, Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
pub(crate) fn instance(id: &str, name: &str, version: u64, az: &str) -> Instance {
    Instance {
        id: id.to_string(),
        hostname: format!("host-{id}"),
        name: name.to_string(),
        version,
        az_name: az.to_string(),
        ..Default::default()
    }
}
