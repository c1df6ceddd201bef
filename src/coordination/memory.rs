//! In-process coordination store
//!
//! Models the parts of a hierarchical store the registry relies on:
//! parent-checked creates, ephemeral nodes owned by a session, and one-shot
//! children watches. Handles created with [`MemoryStore::session`] share
//! the same tree but own their ephemeral nodes independently.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use super::{
    parent_path, ChildWatch, CoordinationClient, CoordinationError, CreateMode, WatchEvent,
};

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    owner: Option<u64>,
}

#[derive(Default)]
struct StoreState {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<oneshot::Sender<WatchEvent>>>,
    next_session: u64,
    unavailable: bool,
}

impl StoreState {
    fn fire_children_changed(&mut self, parent: &str) {
        if let Some(watchers) = self.watches.remove(parent) {
            debug!(path = parent, watchers = watchers.len(), "Firing children watches");
            for tx in watchers {
                let _ = tx.send(WatchEvent::ChildrenChanged {
                    path: parent.to_string(),
                });
            }
        }
    }

    fn check_available(&self) -> Result<(), CoordinationError> {
        if self.unavailable {
            return Err(CoordinationError::Backend("store unavailable".into()));
        }
        Ok(())
    }
}

/// Shared in-memory store; each handle is one session
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    session: u64,
}

impl MemoryStore {
    /// Create an empty store containing only `/`
    pub fn new() -> Self {
        let mut state = StoreState {
            next_session: 2,
            ..Default::default()
        };
        state.nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                owner: None,
            },
        );
        Self {
            state: Arc::new(Mutex::new(state)),
            session: 1,
        }
    }

    /// Open another session on the same tree
    pub async fn session(&self) -> Self {
        let mut state = self.state.lock().await;
        let session = state.next_session;
        state.next_session += 1;
        Self {
            state: Arc::clone(&self.state),
            session,
        }
    }

    /// End this session, removing its ephemeral nodes
    pub async fn expire_session(&self) {
        let mut state = self.state.lock().await;
        let owned: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(self.session))
            .map(|(path, _)| path.clone())
            .collect();

        for path in owned {
            state.nodes.remove(&path);
            if let Some(parent) = parent_path(&path) {
                let parent = parent.to_string();
                state.fire_children_changed(&parent);
            }
        }
        debug!(session = self.session, "Session expired");
    }

    /// Close every outstanding watch without firing it
    pub async fn close_watches(&self) {
        self.state.lock().await.watches.clear();
    }

    /// Make every subsequent operation fail (or succeed again)
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationClient for MemoryStore {
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.nodes.contains_key(path))
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<(), CoordinationError> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        if state.nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        let parent = parent_path(path)
            .ok_or_else(|| CoordinationError::NodeExists(path.to_string()))?
            .to_string();
        if !state.nodes.contains_key(&parent) {
            return Err(CoordinationError::NoNode(parent));
        }

        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(self.session),
        };
        state.nodes.insert(path.to_string(), Node { data, owner });
        state.fire_children_changed(&parent);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        if state.nodes.remove(path).is_none() {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        if let Some(parent) = parent_path(path) {
            let parent = parent.to_string();
            state.fire_children_changed(&parent);
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, CoordinationError> {
        let state = self.state.lock().await;
        state.check_available()?;
        state
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, ChildWatch), CoordinationError> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        if !state.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        let children = state
            .nodes
            .keys()
            .filter(|candidate| parent_path(candidate) == Some(path))
            .filter_map(|candidate| candidate.rsplit('/').next())
            .map(str::to_string)
            .collect();

        let (tx, rx) = oneshot::channel();
        state.watches.entry(path.to_string()).or_default().push(tx);
        Ok((children, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/discovery-service";

    async fn store_with_root() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create(ROOT, Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = store_with_root().await;
        let path = format!("{ROOT}/i1");

        store
            .create(&path, b"doc".to_vec(), CreateMode::Ephemeral)
            .await
            .unwrap();
        assert!(store.exists(&path).await.unwrap());
        assert_eq!(store.get(&path).await.unwrap(), b"doc".to_vec());

        store.delete(&path).await.unwrap();
        assert!(!store.exists(&path).await.unwrap());
        assert_eq!(
            store.delete(&path).await,
            Err(CoordinationError::NoNode(path.clone()))
        );
    }

    #[tokio::test]
    async fn test_duplicate_create_is_node_exists() {
        let store = store_with_root().await;
        let path = format!("{ROOT}/i1");
        store
            .create(&path, Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();
        assert_eq!(
            store.create(&path, Vec::new(), CreateMode::Ephemeral).await,
            Err(CoordinationError::NodeExists(path))
        );
    }

    #[tokio::test]
    async fn test_create_without_parent_fails() {
        let store = MemoryStore::new();
        let result = store
            .create("/missing/i1", Vec::new(), CreateMode::Ephemeral)
            .await;
        assert_eq!(result, Err(CoordinationError::NoNode("/missing".into())));
    }

    #[tokio::test]
    async fn test_children_watch_fires_on_change() {
        let store = store_with_root().await;
        store
            .create(&format!("{ROOT}/a"), Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();

        let (children, watch) = store.children_watch(ROOT).await.unwrap();
        assert_eq!(children, vec!["a".to_string()]);

        store
            .create(&format!("{ROOT}/b"), Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();
        assert_eq!(
            watch.await.unwrap(),
            WatchEvent::ChildrenChanged {
                path: ROOT.to_string()
            }
        );

        let (mut children, _) = store.children_watch(ROOT).await.unwrap();
        children.sort();
        assert_eq!(children, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_session_removes_ephemeral_nodes_only() {
        let store = store_with_root().await;
        let other = store.session().await;

        other
            .create(&format!("{ROOT}/mine"), Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();
        store
            .create(&format!("{ROOT}/theirs"), Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();

        let (_, watch) = store.children_watch(ROOT).await.unwrap();
        other.expire_session().await;

        assert!(watch.await.is_ok());
        let (children, _) = store.children_watch(ROOT).await.unwrap();
        assert_eq!(children, vec!["theirs".to_string()]);
        assert!(store.exists(ROOT).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_watch_reports_error() {
        let store = store_with_root().await;
        let (_, watch) = store.children_watch(ROOT).await.unwrap();
        store.close_watches().await;
        assert!(watch.await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_operations() {
        let store = store_with_root().await;
        store.set_unavailable(true).await;
        assert!(matches!(
            store.exists(ROOT).await,
            Err(CoordinationError::Backend(_))
        ));
        store.set_unavailable(false).await;
        assert!(store.exists(ROOT).await.unwrap());
    }
}
