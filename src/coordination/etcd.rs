//! etcd-backed coordination store
//!
//! etcd is flat, so the hierarchy is encoded in the keys themselves: the
//! children of `P` are the keys `P/<name>` with no further `/`. Ephemeral
//! nodes are attached to a session lease. [`EtcdStore::keep_alive`] renews it
//! under the supervisor; when the process dies the lease expires and etcd
//! deletes them.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client as EtcdClient, Compare, CompareOp, ConnectOptions, EventType, GetOptions,
    LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn, TxnOp, WatchOptions,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{
    parent_path, ChildWatch, CoordinationClient, CoordinationError, CreateMode, WatchEvent,
};
use crate::supervisor::{FatalSignal, Shutdown};

/// Default connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Component name reported when the session is lost
const SESSION_COMPONENT: &str = "etcd-session";

impl From<etcd_client::Error> for CoordinationError {
    fn from(err: etcd_client::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// etcd store whose ephemeral nodes live as long as this session's lease
#[derive(Clone)]
pub struct EtcdStore {
    client: EtcdClient,
    lease_id: i64,
    session_ttl: Duration,
}

impl EtcdStore {
    /// Connect and open a session lease with the given TTL
    ///
    /// The lease is not renewed until [`EtcdStore::keep_alive`] runs.
    pub async fn connect(
        endpoints: &[String],
        session_ttl: Duration,
    ) -> Result<Self, CoordinationError> {
        info!("Connecting to etcd at {}", endpoints.join(","));

        let options = ConnectOptions::new().with_connect_timeout(CONNECT_TIMEOUT);
        let mut client = EtcdClient::connect(endpoints, Some(options))
            .await
            .map_err(|e| {
                CoordinationError::Backend(format!("Failed to connect to etcd: {}", e))
            })?;

        let ttl = session_ttl.as_secs().max(1) as i64;
        let lease = client.lease_grant(ttl, None).await?;
        let lease_id = lease.id();
        info!(lease_id, ttl_secs = ttl, "Opened etcd session");

        Ok(Self {
            client,
            lease_id,
            session_ttl,
        })
    }

    /// Session lease backing ephemeral nodes
    pub fn lease_id(&self) -> i64 {
        self.lease_id
    }

    /// Renew the session lease until shutdown
    ///
    /// Losing the lease is fatal: every ephemeral node this process created
    /// is gone with it.
    pub async fn keep_alive(self, shutdown: Shutdown, fatal: FatalSignal) {
        let mut client = self.client.clone();
        let (keeper, responses) = match client.lease_keep_alive(self.lease_id).await {
            Ok(pair) => pair,
            Err(e) => {
                fatal.raise(
                    SESSION_COMPONENT,
                    format!("Failed to start keep-alive for lease {}: {}", self.lease_id, e),
                );
                return;
            }
        };
        let renewal = EtcdRenewal { keeper, responses };
        let period = renewal_period(self.session_ttl);
        run_session(renewal, self.lease_id, period, shutdown, fatal).await;
    }

    /// Revoke the session lease, deleting every ephemeral node it owns
    pub async fn close(&self) -> Result<(), CoordinationError> {
        let mut client = self.client.clone();
        client.lease_revoke(self.lease_id).await?;
        info!(lease_id = self.lease_id, "Closed etcd session");
        Ok(())
    }
}

/// One lease renewal round trip
#[async_trait]
trait LeaseRenewal: Send {
    /// Renew once and return the remaining TTL in seconds
    async fn renew(&mut self) -> Result<i64, CoordinationError>;
}

struct EtcdRenewal {
    keeper: LeaseKeeper,
    responses: LeaseKeepAliveStream,
}

#[async_trait]
impl LeaseRenewal for EtcdRenewal {
    async fn renew(&mut self) -> Result<i64, CoordinationError> {
        self.keeper.keep_alive().await?;
        match self.responses.message().await? {
            Some(resp) => Ok(resp.ttl()),
            None => Err(CoordinationError::Backend("keep-alive stream ended".to_string())),
        }
    }
}

/// Renew at a third of the TTL, but not more often than twice a second
fn renewal_period(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(500))
}

async fn run_session<R: LeaseRenewal>(
    mut renewal: R,
    lease_id: i64,
    period: Duration,
    mut shutdown: Shutdown,
    fatal: FatalSignal,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(lease_id, "Lease keep-alive stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        match renewal.renew().await {
            Ok(ttl) if ttl > 0 => debug!(lease_id, ttl, "Lease renewed"),
            Ok(_) => {
                fatal.raise(
                    SESSION_COMPONENT,
                    format!("Lease {} expired, ephemeral nodes are gone", lease_id),
                );
                return;
            }
            Err(e) => {
                fatal.raise(
                    SESSION_COMPONENT,
                    format!("Lease {} keep-alive failed: {}", lease_id, e),
                );
                return;
            }
        }
    }
}

/// Direct children of `prefix` among `keys`
fn child_names<'a>(prefix: &str, keys: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    keys.into_iter()
        .filter_map(|key| key.strip_prefix(prefix))
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .map(str::to_string)
        .collect()
}

/// Whether a watch event adds or removes a key
///
/// `revisions` is `(create_revision, mod_revision)` of the event's kv. A put
/// that only rewrites an existing key leaves membership unchanged.
fn is_membership_event(event_type: EventType, revisions: Option<(i64, i64)>) -> bool {
    match event_type {
        EventType::Delete => true,
        EventType::Put => matches!(revisions, Some((created, modified)) if created == modified),
    }
}

/// Key prefix under which the children of `path` live
fn children_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

#[async_trait]
impl CoordinationClient for EtcdStore {
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        if path == "/" {
            return Ok(true);
        }
        let mut client = self.client.clone();
        let resp = client
            .get(path, Some(GetOptions::new().with_count_only()))
            .await?;
        Ok(resp.count() > 0)
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<(), CoordinationError> {
        if let Some(parent) = parent_path(path) {
            if !self.exists(parent).await? {
                return Err(CoordinationError::NoNode(parent.to_string()));
            }
        }

        let options = match mode {
            CreateMode::Persistent => PutOptions::new(),
            CreateMode::Ephemeral => PutOptions::new().with_lease(self.lease_id),
        };
        let txn = Txn::new()
            .when(vec![Compare::create_revision(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(path, data, Some(options))]);

        let mut client = self.client.clone();
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        debug!(path, ?mode, "Created node");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        let mut client = self.client.clone();
        let resp = client.delete(path, None).await?;
        if resp.deleted() == 0 {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        debug!(path, "Deleted node");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, CoordinationError> {
        let mut client = self.client.clone();
        let resp = client.get(path, None).await?;
        resp.kvs()
            .first()
            .map(|kv| kv.value().to_vec())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, ChildWatch), CoordinationError> {
        if !self.exists(path).await? {
            return Err(CoordinationError::NoNode(path.to_string()));
        }

        let prefix = children_prefix(path);
        let mut client = self.client.clone();
        let resp = client
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix().with_keys_only()))
            .await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();

        let children = child_names(
            &prefix,
            resp.kvs().iter().filter_map(|kv| kv.key_str().ok()),
        );

        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(revision + 1);
        let (mut watcher, mut stream) = client.watch(prefix.as_str(), Some(options)).await?;

        let (mut tx, rx) = oneshot::channel();
        let watched = path.to_string();
        tokio::spawn(async move {
            loop {
                // the receiver is dropped when the watching loop stops
                let next = tokio::select! {
                    _ = tx.closed() => break,
                    next = stream.message() => next,
                };
                match next {
                    Ok(Some(resp)) if resp.canceled() => {
                        warn!(path = %watched, "Watch canceled by etcd");
                        break;
                    }
                    Ok(Some(resp)) => {
                        let membership_changed = resp.events().iter().any(|event| {
                            let revisions = event
                                .kv()
                                .map(|kv| (kv.create_revision(), kv.mod_revision()));
                            is_membership_event(event.event_type(), revisions)
                        });
                        if membership_changed {
                            let _ = tx.send(WatchEvent::ChildrenChanged {
                                path: watched.clone(),
                            });
                            break;
                        }
                    }
                    Ok(None) => {
                        warn!(path = %watched, "Watch stream ended");
                        break;
                    }
                    Err(e) => {
                        warn!(path = %watched, error = %e, "Watch stream failed");
                        break;
                    }
                }
            }
            let _ = watcher.cancel().await;
        });

        Ok((children, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::Supervisor;
    use std::collections::VecDeque;

    /// Replays scripted renewals, then keeps renewing
    struct ScriptedRenewal(VecDeque<Result<i64, CoordinationError>>);

    #[async_trait]
    impl LeaseRenewal for ScriptedRenewal {
        async fn renew(&mut self) -> Result<i64, CoordinationError> {
            self.0.pop_front().unwrap_or(Ok(10))
        }
    }

    fn spawn_session(supervisor: &Supervisor, script: Vec<Result<i64, CoordinationError>>) {
        supervisor.spawn(
            SESSION_COMPONENT,
            run_session(
                ScriptedRenewal(script.into()),
                7,
                Duration::from_secs(1),
                supervisor.shutdown_signal(),
                supervisor.fatal_signal(),
            ),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_is_fatal() {
        let supervisor = Supervisor::new();
        spawn_session(
            &supervisor,
            vec![Ok(10), Err(CoordinationError::Backend("connection reset".into()))],
        );

        let fatal = supervisor.wait_fatal().await.unwrap();
        assert_eq!(fatal.component, "etcd-session");
        assert!(fatal.reason.contains("connection reset"));
        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_fatal() {
        let supervisor = Supervisor::new();
        spawn_session(&supervisor, vec![Ok(10), Ok(10), Ok(0)]);

        let fatal = supervisor.wait_fatal().await.unwrap();
        assert_eq!(fatal.component, "etcd-session");
        assert!(fatal.reason.contains("Lease 7 expired"));
        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_stops_on_shutdown() {
        let supervisor = Supervisor::new();
        spawn_session(&supervisor, Vec::new());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(supervisor.try_fatal().is_none());
        supervisor.shutdown().await;
    }

    #[test]
    fn test_renewal_period() {
        assert_eq!(renewal_period(Duration::from_secs(9)), Duration::from_secs(3));
        assert_eq!(renewal_period(Duration::from_secs(1)), Duration::from_millis(500));
    }

    #[test]
    fn test_child_names_keep_direct_children() {
        let keys = [
            "/discovery-service/i1",
            "/discovery-service/i2",
            "/discovery-service/",
            "/discovery-service/i1/nested",
            "/other/i3",
        ];
        assert_eq!(child_names("/discovery-service/", keys), ["i1", "i2"]);
        assert!(child_names("/discovery-service/", std::iter::empty()).is_empty());
    }

    #[test]
    fn test_membership_events() {
        assert!(is_membership_event(EventType::Delete, None));
        assert!(is_membership_event(EventType::Delete, Some((4, 9))));
        assert!(is_membership_event(EventType::Put, Some((5, 5))));
        assert!(!is_membership_event(EventType::Put, Some((5, 8))));
        assert!(!is_membership_event(EventType::Put, None));
    }

    #[test]
    fn test_children_prefix() {
        assert_eq!(children_prefix("/discovery-service"), "/discovery-service/");
        assert_eq!(children_prefix("/discovery-service/"), "/discovery-service/");
    }

    #[test]
    fn test_backend_error_conversion() {
        let err: CoordinationError = etcd_client::Error::InvalidArgs("bad key".into()).into();
        assert!(matches!(err, CoordinationError::Backend(_)));
    }
}
