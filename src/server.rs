//! Request/reply RPC over the messaging transport
//!
//! Each handler is exposed on `<prefix>.<endpoint>`. Requests are JSON; an
//! empty payload decodes as the default request. Replies go to the
//! delivery's reply-to as `{"ok": <response>}` or
//! `{"error": {"code": .., "message": ..}}`.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::handler::{self, ALL_ENDPOINTS};
use crate::registry::Registry;
use crate::supervisor::{FatalSignal, Shutdown, Supervisor};
use crate::transport::{Delivery, DeliveryStream, MessagingTransport};
use crate::types::{DiscoveryError, Result};

/// Error body of a failed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl From<&DiscoveryError> for RpcError {
    fn from(err: &DiscoveryError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Reply envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcReply {
    Ok(serde_json::Value),
    Error(RpcError),
}

/// Serves the handler endpoints for one registry
pub struct RpcServer {
    registry: Arc<Registry>,
    transport: Arc<dyn MessagingTransport>,
    topic_prefix: String,
}

impl RpcServer {
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn MessagingTransport>,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            transport,
            topic_prefix: topic_prefix.into(),
        }
    }

    /// Subject an endpoint is served on
    pub fn subject(&self, endpoint: &str) -> String {
        format!("{}.{}", self.topic_prefix, endpoint)
    }

    /// Subscribe to every endpoint and serve them under the supervisor
    ///
    /// Fails if any subscription cannot be opened.
    pub async fn start(self: Arc<Self>, supervisor: &Supervisor) -> Result<()> {
        let mut streams = Vec::with_capacity(ALL_ENDPOINTS.len());
        for endpoint in ALL_ENDPOINTS {
            let stream = self.transport.subscribe(&self.subject(endpoint)).await?;
            streams.push((endpoint, stream));
        }

        for (endpoint, stream) in streams {
            supervisor.spawn(
                "rpc-server",
                Arc::clone(&self).serve(
                    endpoint,
                    stream,
                    supervisor.shutdown_signal(),
                    supervisor.fatal_signal(),
                ),
            );
        }

        info!(
            prefix = %self.topic_prefix,
            "RPC server listening on {} endpoints",
            ALL_ENDPOINTS.len()
        );
        Ok(())
    }

    async fn serve(
        self: Arc<Self>,
        endpoint: &'static str,
        mut requests: DeliveryStream,
        mut shutdown: Shutdown,
        fatal: FatalSignal,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(endpoint, "RPC endpoint stopped");
                    return;
                }
                next = requests.next() => {
                    let Some(request) = next else {
                        let subject = self.subject(endpoint);
                        fatal.raise("rpc-server", format!("Subscription {} closed", subject));
                        return;
                    };
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.respond(endpoint, request).await });
                }
            }
        }
    }

    async fn respond(&self, endpoint: &str, request: Delivery) {
        let reply = self.handle(endpoint, &request.payload).await;

        let Some(reply_to) = request.reply_to else {
            debug!(endpoint, "Request without reply-to, not replying");
            return;
        };

        let payload = match serde_json::to_vec(&reply) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(endpoint, error = %e, "Failed to encode reply");
                return;
            }
        };
        if let Err(e) = self.transport.publish(&reply_to, payload).await {
            warn!(endpoint, reply_to = %reply_to, error = %e, "Failed to send reply");
        }
    }

    /// Decode, dispatch and wrap the result of one call
    pub async fn handle(&self, endpoint: &str, payload: &[u8]) -> RpcReply {
        match self.dispatch(endpoint, payload).await {
            Ok(value) => RpcReply::Ok(value),
            Err(e) => {
                debug!(endpoint, error = %e, "Request failed");
                RpcReply::Error(RpcError::from(&e))
            }
        }
    }

    async fn dispatch(&self, endpoint: &str, payload: &[u8]) -> Result<serde_json::Value> {
        let registry = self.registry.as_ref();
        let value = match endpoint {
            handler::ENDPOINT_INSTANCES => {
                to_value(handler::instances::instances(registry, decode(payload)?).await?)?
            }
            handler::ENDPOINT_SERVICES => {
                to_value(handler::services::services(registry, decode(payload)?).await?)?
            }
            handler::ENDPOINT_ENDPOINTS => {
                to_value(handler::endpoints::endpoints(registry, decode(payload)?).await?)?
            }
            handler::ENDPOINT_MULTIREGISTER => {
                to_value(handler::register::multi_register(registry, decode(payload)?).await?)?
            }
            handler::ENDPOINT_UNREGISTER => {
                to_value(handler::unregister::unregister(registry, decode(payload)?).await?)?
            }
            other => return Err(DiscoveryError::NotFound(format!("Unknown endpoint {}", other))),
        };
        Ok(value)
    }
}

fn decode<T: DeserializeOwned + Default>(payload: &[u8]) -> Result<T> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(payload)
        .map_err(|e| DiscoveryError::BadRequest(format!("Malformed request: {}", e)))
}

fn to_value<T: Serialize>(response: T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(response)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::coordination::MemoryStore;
    use crate::transport::MemoryBus;
    use std::time::Duration;

    async fn setup() -> (Arc<RpcServer>, Arc<MemoryBus>, Supervisor) {
        let bus = Arc::new(MemoryBus::new());
        let supervisor = Supervisor::new();
        let registry = Registry::start(
            RegistryConfig::default(),
            Arc::new(MemoryStore::new()),
            bus.clone(),
            &supervisor,
        )
        .await
        .unwrap();
        let server = Arc::new(RpcServer::new(registry, bus.clone(), "kernel.discovery"));
        Arc::clone(&server).start(&supervisor).await.unwrap();
        (server, bus, supervisor)
    }

    async fn call(bus: &MemoryBus, subject: &str, body: &str) -> RpcReply {
        let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4());
        let mut replies = bus.subscribe(&inbox).await.unwrap();
        bus.publish_with_reply(subject, &inbox, Bytes::from(body.to_string()))
            .await
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), replies.next())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_slice(&reply.payload).unwrap()
    }

    #[tokio::test]
    async fn test_register_then_query_over_bus() {
        let (_server, bus, supervisor) = setup().await;

        for (id, version) in [("i1", 1), ("i2", 2)] {
            let body = serde_json::json!({
                "instanceId": id,
                "hostname": "host",
                "azName": "az1",
                "service": {"name": "foo", "version": version},
            })
            .to_string();
            let reply = call(&bus, "kernel.discovery.multiregister", &body).await;
            assert_eq!(reply, RpcReply::Ok(serde_json::json!({})));
        }

        let mut services = Vec::new();
        for _ in 0..200 {
            match call(&bus, "kernel.discovery.services", r#"{"service":"foo"}"#).await {
                RpcReply::Ok(value) => {
                    services = value["services"].as_array().cloned().unwrap_or_default()
                }
                RpcReply::Error(e) => panic!("services failed: {:?}", e),
            }
            if services.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(services.len(), 2);

        let reply = call(&bus, "kernel.discovery.instances", "").await;
        let RpcReply::Ok(value) = reply else {
            panic!("instances failed");
        };
        assert_eq!(value["instances"].as_array().map(Vec::len), Some(2));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_is_bad_request() {
        let (_server, bus, supervisor) = setup().await;

        let reply = call(&bus, "kernel.discovery.multiregister", "{not json").await;
        let RpcReply::Error(err) = reply else {
            panic!("expected error reply");
        };
        assert_eq!(err.code, "bad_request");

        let reply = call(&bus, "kernel.discovery.multiregister", r#"{"instanceId":""}"#).await;
        assert!(matches!(reply, RpcReply::Error(ref e) if e.code == "bad_request"));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let (server, _bus, supervisor) = setup().await;
        let reply = server.handle("nope", b"").await;
        assert!(matches!(reply, RpcReply::Error(ref e) if e.code == "not_found"));
        supervisor.shutdown().await;
    }

    #[test]
    fn test_reply_envelope_shape() {
        let ok = serde_json::to_value(RpcReply::Ok(serde_json::json!({"a": 1}))).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": {"a": 1}}));

        let err = RpcReply::Error(RpcError::from(&DiscoveryError::BadRequest("x".into())));
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(err["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_closed_subscription_is_fatal() {
        let (server, bus, supervisor) = setup().await;
        bus.close_subject(&server.subject("services"));

        let fatal = supervisor.wait_fatal().await.unwrap();
        assert_eq!(fatal.component, "rpc-server");
        assert!(fatal.reason.contains("kernel.discovery.services"));
        supervisor.shutdown().await;
    }
}
