//! Error types for the discovery service

use crate::coordination::CoordinationError;

/// Main error type for discovery operations
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Coordination store error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DiscoveryError {
    /// Error code reported to RPC callers
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            _ => "internal_server_error",
        }
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(DiscoveryError::BadRequest("x".into()).code(), "bad_request");
        assert_eq!(
            DiscoveryError::Registration("boom".into()).code(),
            "internal_server_error"
        );
    }

    #[test]
    fn test_coordination_error_converts() {
        let err: DiscoveryError = CoordinationError::Backend("down".into()).into();
        assert!(err.to_string().contains("down"));
    }
}
