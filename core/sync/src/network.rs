//! Network status tracking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::QueueProcessor;

/// Connectivity as seen by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkStatus::Online => write!(f, "online"),
            NetworkStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Source of the current network status.
pub trait NetworkStatusProvider: Send + Sync {
    /// Status right now.
    fn status(&self) -> NetworkStatus;

    /// Receiver that observes every status change.
    fn subscribe(&self) -> watch::Receiver<NetworkStatus>;
}

/// Network status holder fed by probes or by the host platform.
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkStatus>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Update the status. Returns whether it changed.
    pub fn set_status(&self, status: NetworkStatus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(%status, "Network status changed");
        }
        changed
    }
}

impl NetworkStatusProvider for NetworkMonitor {
    fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }
}

/// Probe connectivity by opening a TCP connection to `addr`.
pub async fn probe_connectivity(addr: &str, timeout: Duration) -> NetworkStatus {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => NetworkStatus::Online,
        Ok(Err(e)) => {
            debug!(addr, "Connectivity probe failed: {}", e);
            NetworkStatus::Offline
        }
        Err(_) => {
            debug!(addr, "Connectivity probe timed out");
            NetworkStatus::Offline
        }
    }
}

/// Probe `addr` every `every` and feed the result into `monitor`.
pub fn spawn_probe_loop(
    monitor: Arc<NetworkMonitor>,
    addr: String,
    timeout: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            monitor.set_status(probe_connectivity(&addr, timeout).await);
        }
    })
}

/// Run the queue whenever the network comes back.
///
/// The task ends when the status source is dropped.
pub fn spawn_recovery_trigger(
    processor: Arc<QueueProcessor>,
    network: Arc<dyn NetworkStatusProvider>,
) -> JoinHandle<()> {
    let mut rx = network.subscribe();
    tokio::spawn(async move {
        let mut previous = *rx.borrow_and_update();
        while rx.changed().await.is_ok() {
            let current = *rx.borrow_and_update();
            if previous == NetworkStatus::Offline && current == NetworkStatus::Online {
                info!("Network recovered; processing export queue");
                let outcome = processor.process_queue().await;
                debug!(
                    success = outcome.success_count,
                    failed = outcome.fail_count,
                    skipped = outcome.skipped_count,
                    "Recovery run finished"
                );
            }
            previous = current;
        }
        debug!("Network status source closed; recovery trigger stopped");
    })
}
