//! Shared types for the discovery service

pub mod error;

pub use error::{DiscoveryError, Result};
