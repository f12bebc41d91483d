//! Automatic pending-queue drain on reconnection.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::engine::{SyncEngine, SyncOutcome};

/// Watches the engine's connectivity state and starts a drain each time it
/// goes from disconnected to connected.
///
/// The drain runs on its own task so the watcher keeps receiving state
/// changes; its errors are logged there and never reach the watcher.
pub fn spawn_auto_sync(engine: Arc<SyncEngine>) -> JoinHandle<()> {
    let mut network = engine.network();
    let mut was_connected = network.borrow_and_update().connected;

    tokio::spawn(async move {
        while network.changed().await.is_ok() {
            let connected = network.borrow_and_update().connected;
            if connected && !was_connected {
                tracing::info!("Connection restored, syncing pending consumptions");
                let engine = engine.clone();
                tokio::spawn(async move {
                    match engine.sync_pending_data().await {
                        Ok(SyncOutcome::Completed(report)) if !report.failed.is_empty() => {
                            tracing::warn!(
                                "Auto-sync left {} consumption(s) pending",
                                report.failed.len()
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Auto-sync failed"),
                    }
                });
            }
            was_connected = connected;
        }
    })
}
