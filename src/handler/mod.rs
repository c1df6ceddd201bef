//! Query and command handlers
//!
//! Each handler takes a decoded request, works against the [`Registry`] and
//! returns a response message. Requests and responses are camelCase JSON.
//!
//! [`Registry`]: crate::registry::Registry

pub mod endpoints;
pub mod instances;
pub mod marshaling;
pub mod register;
pub mod services;
pub mod unregister;

pub use endpoints::{EndpointSummary, EndpointsRequest, EndpointsResponse};
pub use instances::{InstanceSummary, InstancesRequest, InstancesResponse};
pub use register::{EndpointRegistration, MultiRegisterRequest, RegisterResponse, ServiceDescriptor};
pub use services::{ServiceSummary, ServicesRequest, ServicesResponse};
pub use unregister::{UnregisterRequest, UnregisterResponse};

/// Names of the RPC endpoints, appended to the topic prefix
pub const ENDPOINT_INSTANCES: &str = "instances";
pub const ENDPOINT_SERVICES: &str = "services";
pub const ENDPOINT_ENDPOINTS: &str = "endpoints";
pub const ENDPOINT_MULTIREGISTER: &str = "multiregister";
pub const ENDPOINT_UNREGISTER: &str = "unregister";

/// Every RPC endpoint the server exposes
pub const ALL_ENDPOINTS: [&str; 5] = [
    ENDPOINT_INSTANCES,
    ENDPOINT_SERVICES,
    ENDPOINT_ENDPOINTS,
    ENDPOINT_MULTIREGISTER,
    ENDPOINT_UNREGISTER,
];

/// `None` for an absent or empty filter string
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
