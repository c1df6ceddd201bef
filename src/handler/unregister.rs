//! `unregister`: remove an instance from discovery

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::registry::Registry;
use crate::types::{DiscoveryError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnregisterRequest {
    pub instance_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterResponse {}

pub async fn unregister(
    registry: &Registry,
    request: UnregisterRequest,
) -> Result<UnregisterResponse> {
    registry
        .unregister(&request.instance_id)
        .await
        .map_err(|e| {
            warn!(instance_id = %request.instance_id, error = %e, "Error unregistering instance");
            DiscoveryError::Internal(format!("Error unregistering instance: {}", e))
        })?;

    Ok(UnregisterResponse {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::empty_registry;
    use crate::registry::types::instance;

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let (registry, _store) = empty_registry().await;
        registry.register(&instance("i1", "foo", 1, "az1")).await.unwrap();

        let request = UnregisterRequest {
            instance_id: "i1".into(),
        };
        unregister(&registry, request.clone()).await.unwrap();
        unregister(&registry, request).await.unwrap();
        assert!(!registry.local().is_monitored("i1").await);
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let (registry, store) = empty_registry().await;
        store.set_unavailable(true).await;

        let err = unregister(
            &registry,
            UnregisterRequest {
                instance_id: "i1".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "internal_server_error");
    }
}
