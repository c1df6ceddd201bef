//! Discovery - region-wide service registry
//!
//! Tracks which service instances are alive, where they run and which
//! endpoints they expose. Instances register through a discovery process,
//! are kept alive by heartbeats over NATS and are evicted (with a
//! service-down broadcast) when they fall silent. Every process mirrors the
//! whole region from the coordination store to answer discovery queries.
//!
//! ## Components
//!
//! - **Registry**: local heartbeat bookkeeping plus the region-wide cache
//! - **Coordination**: ephemeral nodes and child watches (etcd, in-memory)
//! - **Transport**: pub/sub messaging (NATS, in-memory)
//! - **Handler/Server**: discovery queries and registration over NATS
//! - **Supervisor**: background loops, shutdown and fatal errors

pub mod config;
pub mod coordination;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod server;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use config::{Args, RegistryConfig};
pub use registry::{Instance, Instances, Registry};
pub use server::RpcServer;
pub use supervisor::Supervisor;
pub use types::{DiscoveryError, Result};
