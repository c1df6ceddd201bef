//! Coordination store access
//!
//! The registry treats the coordination store as the system of record for
//! live membership: one ephemeral node per registered instance under a
//! shared root, plus a children watch used to keep the region cache fresh.
//!
//! ## Backends
//!
//! - [`etcd::EtcdStore`]: production backend, ephemeral nodes bound to a lease
//! - [`memory::MemoryStore`]: in-process store for tests and dev mode

pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::oneshot;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// Store-level errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node does not exist: {0}")]
    NoNode(String),

    #[error("watch closed for {0}")]
    WatchClosed(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Node lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session
    Persistent,
    /// Removed automatically when the creating session ends
    Ephemeral,
}

/// Notification delivered by a children watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The watched node's children changed
    ChildrenChanged { path: String },
}

/// One-shot children watch; a dropped sender means the watch was closed
pub type ChildWatch = oneshot::Receiver<WatchEvent>;

/// Hierarchical store with ephemeral nodes and children watches
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Whether a node exists at `path`
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError>;

    /// Create a node; fails with `NodeExists` if already present and `NoNode`
    /// if the parent is missing
    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<(), CoordinationError>;

    /// Delete a node; fails with `NoNode` if absent
    async fn delete(&self, path: &str) -> Result<(), CoordinationError>;

    /// Read a node's value
    async fn get(&self, path: &str) -> Result<Vec<u8>, CoordinationError>;

    /// List child names of `path` and arm a watch firing on the next change
    async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, ChildWatch), CoordinationError>;
}

/// Path of the child named `name` under `parent`
pub fn child_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

/// Parent path of `path`, `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("/discovery-service", "i1"), "/discovery-service/i1");
        assert_eq!(child_path("/discovery-service/", "i1"), "/discovery-service/i1");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/discovery-service/i1"), Some("/discovery-service"));
        assert_eq!(parent_path("/discovery-service"), Some("/"));
        assert_eq!(parent_path("/"), None);
    }
}
