//! `instances`: live instances, optionally narrowed by service and zone

use serde::{Deserialize, Serialize};

use super::marshaling::instances_to_summaries;
use super::non_empty;
use crate::registry::{matching_az, matching_service, Registry};
use crate::types::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstancesRequest {
    pub service_name: Option<String>,
    pub az_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub instance_id: String,
    pub hostname: String,
    pub machine_class: String,
    pub service_name: String,
    pub service_description: String,
    pub service_version: u64,
    pub az_name: String,
    pub sub_topic: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancesResponse {
    pub instances: Vec<InstanceSummary>,
}

pub async fn instances(
    registry: &Registry,
    request: InstancesRequest,
) -> Result<InstancesResponse> {
    let mut instances = registry.all_instances().await;
    if let Some(az) = non_empty(&request.az_name) {
        instances = instances.filter(&matching_az(az));
    }
    if let Some(service) = non_empty(&request.service_name) {
        instances = instances.filter(&matching_service(service));
    }

    Ok(InstancesResponse {
        instances: instances_to_summaries(&instances),
    })
}
