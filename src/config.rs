//! Configuration for the discovery service
//!
//! CLI arguments and environment variable handling using clap. The library
//! itself only consumes [`RegistryConfig`].

use clap::{Parser, ValueEnum};
use std::time::Duration;

use crate::types::DiscoveryError;

/// Default root node for instance documents
pub const DEFAULT_ROOT_PATH: &str = "/discovery-service";

/// Default prefix for event topics and RPC subjects
pub const DEFAULT_TOPIC_PREFIX: &str = "kernel.discovery";

/// Discovery - region-wide service registry
#[derive(Parser, Debug, Clone)]
#[command(name = "discovery")]
#[command(about = "Service discovery registry with heartbeat-based liveness")]
pub struct Args {
    /// Enable development mode (allows the in-memory coordination store)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Coordination store backend
    #[arg(
        long,
        env = "COORDINATION_BACKEND",
        value_enum,
        default_value_t = CoordinationBackend::Etcd
    )]
    pub coordination: CoordinationBackend,

    /// Comma-separated etcd endpoints
    #[arg(long, env = "ETCD_ENDPOINTS", default_value = "http://127.0.0.1:2379")]
    pub etcd_endpoints: String,

    /// Lease TTL for ephemeral instance nodes, in seconds
    #[arg(long, env = "SESSION_TTL_SECS", default_value = "10")]
    pub session_ttl_secs: u64,

    /// Root node under which instances are stored
    #[arg(long, env = "ROOT_PATH", default_value = DEFAULT_ROOT_PATH)]
    pub root_path: String,

    /// Seconds between heartbeat pings
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "10")]
    pub heartbeat_interval_secs: u64,

    /// Seconds of silence before an instance is evicted (default 3x interval)
    #[arg(long, env = "MAX_SILENCE_SECS")]
    pub max_silence_secs: Option<u64>,

    /// Attempts at checking/creating the root node on startup
    #[arg(long, env = "INIT_ATTEMPTS", default_value = "30")]
    pub init_attempts: u32,

    /// Delay between root node attempts, in milliseconds
    #[arg(long, env = "INIT_DELAY_MS", default_value = "1000")]
    pub init_delay_ms: u64,

    /// Prefix for service up/down topics and RPC subjects
    #[arg(long, env = "TOPIC_PREFIX", default_value = DEFAULT_TOPIC_PREFIX)]
    pub topic_prefix: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

/// Where instance documents are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CoordinationBackend {
    /// etcd cluster, with leases for ephemeral nodes
    Etcd,
    /// In-process store, dev mode only
    Memory,
}

impl Args {
    /// Get the list of etcd endpoints
    pub fn etcd_endpoint_list(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Effective max-silence window
    pub fn max_silence(&self) -> Duration {
        let secs = self
            .max_silence_secs
            .unwrap_or(self.heartbeat_interval_secs.saturating_mul(3));
        Duration::from_secs(secs)
    }

    /// Runtime settings for the registry
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            root_path: self.root_path.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            max_silence: self.max_silence(),
            init_attempts: self.init_attempts,
            init_delay: Duration::from_millis(self.init_delay_ms),
            topic_prefix: self.topic_prefix.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        let invalid = |msg: &str| Err(DiscoveryError::Config(msg.to_string()));

        if self.heartbeat_interval_secs == 0 {
            return invalid("HEARTBEAT_INTERVAL_SECS must be greater than zero");
        }

        if self.max_silence() <= Duration::from_secs(self.heartbeat_interval_secs) {
            return invalid("MAX_SILENCE_SECS must be greater than HEARTBEAT_INTERVAL_SECS");
        }

        if self.init_attempts == 0 {
            return invalid("INIT_ATTEMPTS must be greater than zero");
        }

        if !self.root_path.starts_with('/') {
            return invalid("ROOT_PATH must be an absolute path");
        }

        // node paths never end with '/', so "/a/" would never match "/a"
        if self.root_path.len() > 1 && self.root_path.ends_with('/') {
            return invalid("ROOT_PATH must not end with '/'");
        }

        if self.coordination == CoordinationBackend::Memory && !self.dev_mode {
            return invalid("The memory coordination backend requires DEV_MODE");
        }

        if self.coordination == CoordinationBackend::Etcd && self.etcd_endpoint_list().is_empty() {
            return invalid("ETCD_ENDPOINTS must name at least one endpoint");
        }

        Ok(())
    }
}

/// Runtime settings consumed by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub root_path: String,
    pub heartbeat_interval: Duration,
    pub max_silence: Duration,
    pub init_attempts: u32,
    pub init_delay: Duration,
    pub topic_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root_path: DEFAULT_ROOT_PATH.to_string(),
            heartbeat_interval: Duration::from_secs(10),
            max_silence: Duration::from_secs(30),
            init_attempts: 30,
            init_delay: Duration::from_secs(1),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}
