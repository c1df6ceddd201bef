//! `multiregister`: register an instance and all its endpoints in one call

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::marshaling::multi_register_to_instance;
use crate::registry::Registry;
use crate::types::{DiscoveryError, Result};

/// Service-level fields of a registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceDescriptor {
    pub name: String,
    pub description: String,
    pub version: u64,
    pub source: String,
    pub owner_email: String,
    pub owner_mobile: String,
    pub owner_team: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointRegistration {
    pub name: String,
    pub mean: u32,
    pub upper95: u32,
    pub subscribe: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MultiRegisterRequest {
    pub instance_id: String,
    pub hostname: String,
    pub machine_class: String,
    pub az_name: String,
    pub service: ServiceDescriptor,
    pub endpoints: Vec<EndpointRegistration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {}

pub async fn multi_register(
    registry: &Registry,
    request: MultiRegisterRequest,
) -> Result<RegisterResponse> {
    if request.instance_id.is_empty() {
        return Err(DiscoveryError::BadRequest("instanceId is required".into()));
    }
    if request.service.name.is_empty() {
        return Err(DiscoveryError::BadRequest("service name is required".into()));
    }

    let instance = multi_register_to_instance(&request);
    registry.register(&instance).await.map_err(|e| {
        warn!(instance_id = %instance.id, error = %e, "Error registering instance");
        DiscoveryError::Internal(format!("Error registering: {}", e))
    })?;

    Ok(RegisterResponse {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::empty_registry;

    fn request(instance_id: &str, service: &str) -> MultiRegisterRequest {
        MultiRegisterRequest {
            instance_id: instance_id.into(),
            hostname: "host".into(),
            az_name: "az1".into(),
            service: ServiceDescriptor {
                name: service.into(),
                version: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_multi_register_creates_monitor() {
        let (registry, _store) = empty_registry().await;
        multi_register(&registry, request("i1", "foo")).await.unwrap();
        assert!(registry.local().is_monitored("i1").await);
    }

    #[tokio::test]
    async fn test_missing_fields_are_bad_requests() {
        let (registry, _store) = empty_registry().await;

        let err = multi_register(&registry, request("", "foo")).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
        let err = multi_register(&registry, request("i1", "")).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
        assert!(registry.local().monitored_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let (registry, store) = empty_registry().await;
        store.set_unavailable(true).await;

        let err = multi_register(&registry, request("i1", "foo")).await.unwrap_err();
        assert_eq!(err.code(), "internal_server_error");
        assert!(err.to_string().contains("Error registering"));
    }

    #[test]
    fn test_request_decodes_nested_service() {
        let json = r#"{
            "instanceId": "i1",
            "hostname": "h",
            "service": {"name": "foo", "version": 3, "ownerEmail": "a@b"},
            "endpoints": [{"name": "bar", "mean": 10, "upper95": 20}]
        }"#;
        let request: MultiRegisterRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.service.version, 3);
        assert_eq!(request.service.owner_email, "a@b");
        assert_eq!(request.endpoints[0].upper95, 20);
        assert!(request.machine_class.is_empty());
    }
}
