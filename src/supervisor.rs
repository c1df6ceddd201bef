//! Background task supervision
//!
//! Every long-running loop (heartbeat sender and receiver, region syncer,
//! RPC listeners) is spawned through a [`Supervisor`]. Loops watch a
//! [`Shutdown`] signal and report unrecoverable conditions through a
//! [`FatalSignal`] instead of exiting the process; the binary decides what
//! a fatal error means.

use std::future::Future;
use std::sync::Mutex;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// An unrecoverable failure reported by a background loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    /// Component that failed
    pub component: &'static str,
    /// Human readable reason
    pub reason: String,
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.component, self.reason)
    }
}

/// Handle used by loops to report fatal errors
#[derive(Clone)]
pub struct FatalSignal {
    tx: mpsc::UnboundedSender<FatalError>,
}

impl FatalSignal {
    /// Report a fatal error to the supervisor
    pub fn raise(&self, component: &'static str, reason: impl Into<String>) {
        let fatal = FatalError {
            component,
            reason: reason.into(),
        };
        error!(component = fatal.component, reason = %fatal.reason, "Fatal error");
        if self.tx.send(fatal).is_err() {
            warn!(component, "Supervisor gone, fatal error dropped");
        }
    }
}

/// Shutdown notification shared by all supervised loops
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Wait until shutdown is requested (or the supervisor is dropped)
    pub async fn recv(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether shutdown has already been requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Owns background tasks, the shutdown signal and the fatal channel
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    fatal_tx: mpsc::UnboundedSender<FatalError>,
    fatal_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FatalError>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Supervisor {
    /// Create a supervisor with no tasks
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            shutdown_tx,
            fatal_tx,
            fatal_rx: tokio::sync::Mutex::new(fatal_rx),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A shutdown receiver for a new loop
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// A fatal-error sender for a new loop
    pub fn fatal_signal(&self) -> FatalSignal {
        FatalSignal {
            tx: self.fatal_tx.clone(),
        }
    }

    /// Spawn a supervised task
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Spawning supervised task");
        let handle = tokio::spawn(task);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push((name, handle));
    }

    /// Number of tasks spawned so far
    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait for the first fatal error
    pub async fn wait_fatal(&self) -> Option<FatalError> {
        self.fatal_rx.lock().await.recv().await
    }

    /// Return a fatal error if one has already been reported
    pub fn try_fatal(&self) -> Option<FatalError> {
        self.fatal_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Signal shutdown and join every task
    pub async fn shutdown(self) {
        info!("Shutting down background tasks");
        let _ = self.shutdown_tx.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Task ended abnormally");
            } else {
                debug!(task = name, "Task stopped");
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fatal_error_reaches_supervisor() {
        let supervisor = Supervisor::new();
        let fatal = supervisor.fatal_signal();

        supervisor.spawn("failing", async move {
            fatal.raise("failing", "stream closed");
        });

        let err = supervisor.wait_fatal().await.unwrap();
        assert_eq!(err.component, "failing");
        assert_eq!(err.reason, "stream closed");
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loops() {
        let supervisor = Supervisor::new();
        for _ in 0..3 {
            let mut shutdown = supervisor.shutdown_signal();
            supervisor.spawn("looping", async move {
                shutdown.recv().await;
            });
        }
        assert_eq!(supervisor.task_count(), 3);
        assert!(supervisor.try_fatal().is_none());

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_signal_after_shutdown_observed() {
        let supervisor = Supervisor::new();
        let shutdown = supervisor.shutdown_signal();
        assert!(!shutdown.is_shutdown());
        supervisor.shutdown().await;
        assert!(shutdown.is_shutdown());
    }
}
