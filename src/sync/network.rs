//! Connectivity state and the probe that keeps it current.

use std::sync::Arc;
use std::time::Duration;

use acueducto_core::RemoteApi;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Last known connectivity. Lives for the process only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkStatus {
    pub connected: bool,
}

impl NetworkStatus {
    pub fn online() -> Self {
        Self { connected: true }
    }

    pub fn offline() -> Self {
        Self { connected: false }
    }
}

/// Owner of the connectivity state.
///
/// Consumers hold a `watch::Receiver` and only get woken when the state
/// actually changes.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkStatus>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// Records a connectivity reading. Returns true if the state changed.
    pub fn set_connected(&self, connected: bool) -> bool {
        self.tx.send_if_modified(|status| {
            if status.connected == connected {
                return false;
            }
            status.connected = connected;
            true
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::offline())
    }
}

/// Checks once whether the remote answers and records the result.
pub async fn probe_once(monitor: &NetworkMonitor, remote: &dyn RemoteApi) -> bool {
    let connected = match remote.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "connectivity probe failed");
            false
        }
    };

    if monitor.set_connected(connected) {
        tracing::info!(
            "Network is now {}",
            if connected { "online" } else { "offline" }
        );
    }
    connected
}

/// Probes the remote every `interval` until the task is aborted.
pub fn spawn_probe(
    monitor: Arc<NetworkMonitor>,
    remote: Arc<dyn RemoteApi>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            probe_once(&monitor, remote.as_ref()).await;
        }
    })
}
