//! `endpoints`: every distinct endpoint, for all versions of each service
//!
//! Without a service name this can run to thousands of entries.

use serde::{Deserialize, Serialize};

use super::marshaling::instances_to_endpoints;
use super::non_empty;
use crate::registry::{matching_service, Registry};
use crate::types::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointsRequest {
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    /// `service.endpoint`
    pub fq_name: String,
    pub version: u64,
    pub mean: u32,
    pub upper95: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsResponse {
    pub endpoints: Vec<EndpointSummary>,
}

pub async fn endpoints(
    registry: &Registry,
    request: EndpointsRequest,
) -> Result<EndpointsResponse> {
    let mut instances = registry.all_instances().await;
    if let Some(service) = non_empty(&request.service) {
        instances = instances.filter(&matching_service(service));
    }

    Ok(EndpointsResponse {
        endpoints: instances_to_endpoints(&instances),
    })
}
