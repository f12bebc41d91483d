//! Commands that talk to the remote service.

use std::sync::Arc;

use clap::Args;
use sqlx::SqlitePool;

use acueducto::config::Config;
use acueducto::db::LocalStore;
use acueducto::sync::{
    probe_once, spawn_auto_sync, spawn_probe, NetworkMonitor, SkipReason, SyncEngine,
    SyncOutcome, SyncReport,
};
use acueducto_core::{HttpRemoteApi, RemoteApi, SyncError};

/// Upload pending readings to the server
#[derive(Debug, Args)]
pub struct SyncCommand {}

/// Download installations, then upload pending readings
#[derive(Debug, Args)]
pub struct SyncViewsCommand {}

/// Stay running and sync whenever the connection comes back
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Seconds between connectivity checks (default: from config)
    #[arg(long)]
    interval: Option<u64>,
}

/// Engine wired to the configured remote, plus the monitor feeding it.
struct Session {
    engine: Arc<SyncEngine>,
    monitor: Arc<NetworkMonitor>,
    remote: Arc<dyn RemoteApi>,
}

impl Session {
    fn open(pool: &SqlitePool, config: &Config) -> Result<Self, SyncCommandError> {
        let server_url = config
            .server_url
            .value
            .as_deref()
            .filter(|_| config.is_remote_configured())
            .ok_or(SyncCommandError::NotConfigured)?;

        let client = HttpRemoteApi::with_timeout(
            server_url,
            config.api_token.value.clone(),
            config.request_timeout(),
        )
        .map_err(SyncError::from)?;
        let remote: Arc<dyn RemoteApi> = Arc::new(client);
        let monitor = Arc::new(NetworkMonitor::default());
        let engine = Arc::new(SyncEngine::new(
            LocalStore::new(pool.clone()),
            remote.clone(),
            monitor.subscribe(),
        ));

        Ok(Self {
            engine,
            monitor,
            remote,
        })
    }

    async fn probe(&self) -> bool {
        probe_once(&self.monitor, self.remote.as_ref()).await
    }
}

impl SyncCommand {
    pub async fn run(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let session = Session::open(pool, config)?;
        session.probe().await;

        match session.engine.sync_pending_data().await? {
            SyncOutcome::Skipped(SkipReason::Offline) => {
                println!("Server unreachable; readings stay queued.");
            }
            SyncOutcome::Skipped(SkipReason::InProgress) => {
                println!("A sync is already running.");
            }
            SyncOutcome::Completed(report) => print_report(&report),
        }
        Ok(())
    }
}

impl SyncViewsCommand {
    pub async fn run(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let session = Session::open(pool, config)?;
        session.probe().await;

        let report = session.engine.sync_views().await?;
        println!("✓ {} installation(s) downloaded", report.installations);
        print_report(&report.pending);
        Ok(())
    }
}

impl WatchCommand {
    pub async fn run(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let session = Session::open(pool, config)?;
        let interval = self
            .interval
            .map(|secs| std::time::Duration::from_secs(secs.max(1)))
            .unwrap_or_else(|| config.probe_interval());

        println!(
            "Watching {} every {}s (Ctrl-C to stop)",
            config.server_url.value.as_deref().unwrap_or_default(),
            interval.as_secs()
        );

        let mut status = session.monitor.subscribe();
        let auto_sync = spawn_auto_sync(session.engine.clone());
        let probe = spawn_probe(session.monitor.clone(), session.remote.clone(), interval);

        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let connected = status.borrow_and_update().connected;
                    println!("{}", if connected { "● online" } else { "○ offline" });
                }
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            }
        }

        probe.abort();
        auto_sync.abort();

        let waiting = session
            .engine
            .store()
            .query_pending(acueducto_core::SyncStatus::Pending)
            .await
            .map_err(SyncError::from)?;
        println!("Stopped. {} reading(s) still pending.", waiting.len());
        Ok(())
    }
}

fn print_report(report: &SyncReport) {
    if report.attempted == 0 {
        println!("Nothing to sync.");
        return;
    }

    println!("✓ {} of {} reading(s) synced", report.synced, report.attempted);
    for failed in &report.failed {
        let hint = if failed.retryable {
            "will retry"
        } else {
            "rejected"
        };
        println!("  ✗ local #{} ({}): {}", failed.local_id, hint, failed.error);
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    NotConfigured,
    SyncError(SyncError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::NotConfigured => write!(
                f,
                "No server configured. Set server_url in the config file or ACUEDUCTO_SERVER_URL"
            ),
            SyncCommandError::SyncError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::NotConfigured => None,
            SyncCommandError::SyncError(e) => Some(e),
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::SyncError(e)
    }
}
