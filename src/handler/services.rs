//! `services`: distinct (name, version) pairs running in the region

use serde::{Deserialize, Serialize};

use super::marshaling::instances_to_services;
use super::non_empty;
use crate::registry::{matching_service, Registry};
use crate::types::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServicesRequest {
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub name: String,
    pub description: String,
    pub version: u64,
    pub source: String,
    pub owner_email: String,
    pub owner_mobile: String,
    pub owner_team: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesResponse {
    pub services: Vec<ServiceSummary>,
}

pub async fn services(registry: &Registry, request: ServicesRequest) -> Result<ServicesResponse> {
    let mut instances = registry.all_instances().await;
    if let Some(service) = non_empty(&request.service) {
        instances = instances.filter(&matching_service(service));
    }

    Ok(ServicesResponse {
        services: instances_to_services(&instances),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::seeded_registry;
    use crate::registry::types::instance;

    #[tokio::test]
    async fn test_two_versions_are_two_services() {
        let registry = seeded_registry(vec![
            instance("1", "foo", 1, "az1"),
            instance("2", "foo", 2, "az1"),
            instance("3", "bar", 1, "az1"),
        ])
        .await;

        let response = services(
            &registry,
            ServicesRequest {
                service: Some("foo".into()),
            },
        )
        .await
        .unwrap();

        let mut versions: Vec<u64> = response.services.iter().map(|s| s.version).collect();
        versions.sort();
        assert_eq!(versions, vec![1, 2]);
        assert!(response.services.iter().all(|s| s.name == "foo"));

        let all = services(&registry, ServicesRequest::default()).await.unwrap();
        assert_eq!(all.services.len(), 3);
    }
}
