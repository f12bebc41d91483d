//! Offline-first synchronization of captured readings.
//!
//! - [`SyncEngine`] drains the pending queue against the remote API and
//!   refreshes reference data, one run at a time per process.
//! - [`NetworkMonitor`] holds the last known connectivity state; the
//!   connectivity probe is what updates it.
//! - [`spawn_auto_sync`] starts a pending-queue drain whenever the state
//!   goes from disconnected to connected.

pub mod auto_sync;
pub mod engine;
pub mod network;

pub use auto_sync::spawn_auto_sync;
pub use engine::{FailedRecord, SkipReason, SyncEngine, SyncOutcome, SyncReport, ViewsReport};
pub use network::{probe_once, spawn_probe, NetworkMonitor, NetworkStatus};
