//! Heartbeat tracking for registered instances
//!
//! A [`HeartbeatMonitor`] remembers when an instance last answered a ping
//! and judges it healthy while that answer is younger than the allowed
//! silence window. [`HeartbeatResponder`] is the instance side of the
//! protocol: it answers pings sent by a discovery process.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::supervisor::Shutdown;
use crate::transport::MessagingTransport;
use crate::types::Result;

/// Payload of an outbound heartbeat ping
pub const PING_PAYLOAD: &[u8] = b"PING";

/// Payload of a heartbeat reply
pub const PONG_PAYLOAD: &[u8] = b"PONG";

/// Liveness state for a single instance
#[derive(Debug)]
pub struct HeartbeatMonitor {
    id: String,
    max_silence: Duration,
    last: RwLock<Instant>,
}

impl HeartbeatMonitor {
    /// Create a monitor that starts out healthy
    pub fn new(id: impl Into<String>, max_silence: Duration) -> Self {
        Self {
            id: id.into(),
            max_silence,
            last: RwLock::new(Instant::now()),
        }
    }

    /// Instance id this monitor tracks
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record a heartbeat
    pub fn beat(&self) {
        let now = Instant::now();
        match self.last.write() {
            Ok(mut last) => *last = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    /// Time of the most recent heartbeat
    pub fn last(&self) -> Instant {
        match self.last.read() {
            Ok(last) => *last,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Whether the last heartbeat is within the silence window
    pub fn healthy(&self) -> bool {
        Instant::now() < self.last() + self.max_silence
    }
}

impl fmt::Display for HeartbeatMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.healthy() { "HEALTHY" } else { "UNHEALTHY" };
        write!(
            f,
            "Heartbeat {}: {} [{:?} ago]",
            self.id,
            state,
            self.last().elapsed()
        )
    }
}

// =============================================================================
// Instance side
// =============================================================================

/// Answers heartbeat pings on behalf of one service instance
pub struct HeartbeatResponder {
    instance_id: String,
    transport: Arc<dyn MessagingTransport>,
}

impl HeartbeatResponder {
    /// Create a responder for the given instance
    pub fn new(instance_id: impl Into<String>, transport: Arc<dyn MessagingTransport>) -> Self {
        Self {
            instance_id: instance_id.into(),
            transport,
        }
    }

    /// Subscribe to pings and answer them until shutdown or the stream ends
    pub async fn run(self, mut shutdown: Shutdown) -> Result<()> {
        let mut pings = self.transport.subscribe(&self.instance_id).await?;
        info!(instance_id = %self.instance_id, "Answering heartbeats");

        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                next = pings.next() => {
                    let Some(ping) = next else {
                        warn!(instance_id = %self.instance_id, "Heartbeat subscription closed");
                        return Ok(());
                    };
                    let Some(reply_to) = ping.reply_to else {
                        debug!(instance_id = %self.instance_id, "Ping without reply-to ignored");
                        continue;
                    };
                    let pong = Bytes::from_static(PONG_PAYLOAD);
                    if let Err(e) = self
                        .transport
                        .publish_with_reply(&reply_to, &self.instance_id, pong)
                        .await
                    {
                        warn!(
                            instance_id = %self.instance_id,
                            error = %e,
                            "Failed to answer heartbeat"
                        );
                    }
                }
            }
        }
    }

    /// Run the responder on its own task
    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            let instance_id = self.instance_id.clone();
            if let Err(e) = self.run(shutdown).await {
                warn!(instance_id = %instance_id, error = %e, "Heartbeat responder stopped");
            }
        })
    }
}
