//! Pending-queue drain and reference-data refresh.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use acueducto_core::{PendingConsumption, RemoteApi, SyncError, SyncStatus};
use tokio::sync::watch;

use super::network::NetworkStatus;
use crate::db::{LocalStore, MarkOutcome};

/// Why a drain request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    InProgress,
}

/// A record left pending by a drain.
#[derive(Debug, Clone)]
pub struct FailedRecord {
    pub local_id: i64,
    pub error: String,
    /// The server was unreachable; the record will go out on a later run.
    pub retryable: bool,
}

/// What one pass over the pending queue did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: Vec<FailedRecord>,
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(SyncReport),
}

/// Result of a full view refresh.
#[derive(Debug, Clone)]
pub struct ViewsReport {
    pub installations: usize,
    pub pending: SyncReport,
}

/// Held for the duration of a sync run; releases the run flag on drop.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Synchronizes the local store with the remote service.
///
/// `sync_pending_data` and `sync_views` share one run flag: at most one of
/// them executes at a time in a process.
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteApi>,
    network: watch::Receiver<NetworkStatus>,
    running: AtomicBool,
    runs: AtomicU64,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteApi>,
        network: watch::Receiver<NetworkStatus>,
    ) -> Self {
        Self {
            store,
            remote,
            network,
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        }
    }

    /// Last known connectivity. Does not touch the network.
    pub fn is_online(&self) -> bool {
        self.network.borrow().connected
    }

    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of pending-queue drains started by this engine.
    pub fn sync_runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// A receiver for the connectivity state this engine reads.
    pub fn network(&self) -> watch::Receiver<NetworkStatus> {
        self.network.clone()
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                flag: &self.running,
            })
    }

    /// Uploads every pending record.
    ///
    /// Best effort: when offline or when another run is active this returns
    /// `Skipped` straight away. A record that fails to upload stays pending
    /// and the rest of the batch still runs.
    pub async fn sync_pending_data(&self) -> Result<SyncOutcome, SyncError> {
        if !self.is_online() {
            tracing::info!("Sync skipped: no network connection");
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }

        let Some(guard) = self.try_begin() else {
            tracing::info!("Sync skipped: synchronization already in progress");
            return Ok(SyncOutcome::Skipped(SkipReason::InProgress));
        };

        let report = self.drain_pending(&guard).await?;
        Ok(SyncOutcome::Completed(report))
    }

    /// Refreshes installations from the server, then drains the pending
    /// queue, all under one run.
    ///
    /// Fails with [`SyncError::Connectivity`] when offline and
    /// [`SyncError::Conflict`] when a run is active. If fetching or storing
    /// installations fails, the pending queue is not touched.
    pub async fn sync_views(&self) -> Result<ViewsReport, SyncError> {
        if !self.is_online() {
            return Err(SyncError::Connectivity);
        }
        let guard = self.try_begin().ok_or(SyncError::Conflict)?;

        tracing::info!("Starting view sync");

        let installations = self.remote.list_installations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to fetch installations");
            e
        })?;
        let installations = self
            .store
            .replace_all_installations(&installations)
            .await?;
        tracing::info!("Installations synchronized: {}", installations);

        let pending = self.drain_pending(&guard).await?;

        tracing::info!("View sync completed");
        Ok(ViewsReport {
            installations,
            pending,
        })
    }

    async fn drain_pending(&self, _guard: &RunGuard<'_>) -> Result<SyncReport, SyncError> {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let batch = self.store.scan_pending(SyncStatus::Pending).await?;

        tracing::info!(
            run,
            unreadable = batch.unreadable.len(),
            "Found {} pending consumption(s)",
            batch.records.len()
        );

        let mut report = SyncReport {
            attempted: batch.records.len() + batch.unreadable.len(),
            ..SyncReport::default()
        };

        // Stays pending until someone repairs the stored row.
        for unreadable in batch.unreadable {
            tracing::error!(
                local_id = unreadable.local_id,
                error = %unreadable.error,
                "Pending consumption could not be read"
            );
            report.failed.push(FailedRecord {
                local_id: unreadable.local_id,
                error: unreadable.error.to_string(),
                retryable: false,
            });
        }

        for record in &batch.records {
            match self.upload(record).await {
                Ok(()) => report.synced += 1,
                Err(failure) => report.failed.push(failure),
            }
        }

        tracing::info!(
            run,
            synced = report.synced,
            failed = report.failed.len(),
            "Pending sync completed"
        );
        Ok(report)
    }

    /// Uploads one record. Failures are logged and returned, never raised.
    async fn upload(&self, pending: &PendingConsumption) -> Result<(), FailedRecord> {
        let local_id = pending.local_id;

        let created = match self
            .remote
            .create_consumption(&pending.record, pending.idempotency_key)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                let retryable = e.is_connectivity();
                if retryable {
                    tracing::warn!(local_id, error = %e, "Server unreachable, consumption stays pending");
                } else {
                    tracing::error!(local_id, error = %e, "Server rejected consumption");
                }
                return Err(FailedRecord {
                    local_id,
                    error: e.to_string(),
                    retryable,
                });
            }
        };

        // The server has the reading now; only local bookkeeping is left.
        let marked = match &created {
            Some(committed) => self.store.promote_pending(local_id, committed).await,
            None => {
                tracing::debug!(
                    local_id,
                    "Server accepted consumption without returning its code"
                );
                self.store.mark_synced(local_id).await
            }
        };

        match marked {
            Ok(MarkOutcome::Updated) => {
                tracing::debug!(
                    local_id,
                    code = ?created.as_ref().map(|c| c.code),
                    "Consumption synchronized"
                );
                Ok(())
            }
            Ok(outcome) => {
                tracing::warn!(local_id, ?outcome, "Pending consumption changed during sync");
                Ok(())
            }
            Err(e) => {
                tracing::error!(local_id, error = %e, "Uploaded consumption could not be marked synced");
                Err(FailedRecord {
                    local_id,
                    error: e.to_string(),
                    retryable: true,
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::sync::network::NetworkMonitor;
    use acueducto_core::{
        Consumption, ConsumptionRecord, FixedClock, Installation, RemoteError,
    };
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicI64;
    use sqlx::SqlitePool;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::{Notify, Semaphore};
    use uuid::Uuid;

    /// Lets a test hold a create call open until it decides to release it.
    pub(crate) struct Gate {
        pub entered: Notify,
        pub release: Semaphore,
    }

    impl Gate {
        pub fn closed() -> Arc<Self> {
            Arc::new(Self {
                entered: Notify::new(),
                release: Semaphore::new(0),
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeRemote {
        /// Installations whose readings the server rejects.
        pub rejected: HashSet<i64>,
        /// Installations whose uploads hit a dead connection.
        pub unreachable: HashSet<i64>,
        /// Installations whose uploads succeed without a committed row.
        pub anonymous: HashSet<i64>,
        /// `None` makes the installation fetch fail.
        pub installations: Option<Vec<Installation>>,
        pub created: Mutex<Vec<(i64, Uuid)>>,
        pub next_code: AtomicI64,
        pub gate: Option<Arc<Gate>>,
    }

    impl FakeRemote {
        pub fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RemoteApi for FakeRemote {
        async fn create_consumption(
            &self,
            record: &ConsumptionRecord,
            idempotency_key: Uuid,
        ) -> Result<Option<Consumption>, RemoteError> {
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.acquire().await.unwrap().forget();
            }
            if self.unreachable.contains(&record.installation) {
                return Err(RemoteError::Connectivity("timed out".to_string()));
            }
            if self.rejected.contains(&record.installation) {
                return Err(RemoteError::Rejected {
                    status: 400,
                    message: "instalacion no existe".to_string(),
                });
            }
            self.created
                .lock()
                .unwrap()
                .push((record.installation, idempotency_key));
            if self.anonymous.contains(&record.installation) {
                return Ok(None);
            }
            Ok(Some(Consumption {
                code: 1000 + self.next_code.fetch_add(1, Ordering::SeqCst),
                name: None,
                record: record.clone(),
            }))
        }

        async fn list_installations(&self) -> Result<Vec<Installation>, RemoteError> {
            self.installations
                .clone()
                .ok_or_else(|| RemoteError::Connectivity("connection reset".to_string()))
        }

        async fn ping(&self) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    pub(crate) struct TestContext {
        pub engine: Arc<SyncEngine>,
        pub remote: Arc<FakeRemote>,
        pub monitor: NetworkMonitor,
        pub pool: SqlitePool,
        _temp_dir: TempDir,
    }

    pub(crate) fn record(installation: i64) -> ConsumptionRecord {
        ConsumptionRecord {
            installation,
            reading: 100.0 + installation as f64,
            consumption: 12.0,
            month: 3,
            year: 2024,
            date: "2024-03-15".to_string(),
            meter: String::new(),
            extra_charges: 0.0,
            reconnection: 0,
            user: "lector1".to_string(),
        }
    }

    pub(crate) async fn setup(remote: FakeRemote, online: bool) -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        let store = LocalStore::with_clock(
            pool.clone(),
            Arc::new(FixedClock::ymd(2024, 3, 15).unwrap()),
        );
        let monitor = NetworkMonitor::new(NetworkStatus { connected: online });
        let remote = Arc::new(remote);
        let engine = Arc::new(SyncEngine::new(store, remote.clone(), monitor.subscribe()));
        TestContext {
            engine,
            remote,
            monitor,
            pool,
            _temp_dir: temp_dir,
        }
    }

    async fn queue(ctx: &TestContext, installations: &[i64]) {
        for installation in installations {
            ctx.engine
                .store()
                .append_pending(&record(*installation))
                .await
                .unwrap();
        }
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            other => panic!("expected a completed run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drain_syncs_all_pending() {
        let ctx = setup(FakeRemote::default(), true).await;
        queue(&ctx, &[1, 2, 3]).await;

        let report = completed(ctx.engine.sync_pending_data().await.unwrap());
        assert_eq!(report.attempted, 3);
        assert_eq!(report.synced, 3);
        assert!(report.failed.is_empty());

        let store = ctx.engine.store();
        assert!(store.query_pending(SyncStatus::Pending).await.unwrap().is_empty());
        assert_eq!(store.query_pending(SyncStatus::Synced).await.unwrap().len(), 3);
        assert_eq!(ctx.remote.created_count(), 3);
        assert!(!ctx.engine.is_syncing());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let remote = FakeRemote {
            rejected: HashSet::from([2]),
            ..FakeRemote::default()
        };
        let ctx = setup(remote, true).await;
        queue(&ctx, &[1, 2, 3, 4]).await;

        let report = completed(ctx.engine.sync_pending_data().await.unwrap());
        assert_eq!(report.synced, 3);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.failed[0].retryable);

        let still_pending = ctx
            .engine
            .store()
            .query_pending(SyncStatus::Pending)
            .await
            .unwrap();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].record.installation, 2);
        assert_eq!(report.failed[0].local_id, still_pending[0].local_id);
    }

    #[tokio::test]
    async fn test_connectivity_failure_is_retryable() {
        let remote = FakeRemote {
            unreachable: HashSet::from([1]),
            ..FakeRemote::default()
        };
        let ctx = setup(remote, true).await;
        queue(&ctx, &[1, 2]).await;

        let report = completed(ctx.engine.sync_pending_data().await.unwrap());
        assert_eq!(report.synced, 1);
        assert!(report.failed[0].retryable);
    }

    #[tokio::test]
    async fn test_failed_record_retried_on_next_run() {
        let remote = FakeRemote {
            unreachable: HashSet::from([1]),
            ..FakeRemote::default()
        };
        let ctx = setup(remote, true).await;
        queue(&ctx, &[1, 2]).await;

        completed(ctx.engine.sync_pending_data().await.unwrap());
        let second = completed(ctx.engine.sync_pending_data().await.unwrap());

        // Only the record that failed is attempted again.
        assert_eq!(second.attempted, 1);
        assert_eq!(ctx.remote.created_count(), 1);
    }

    #[tokio::test]
    async fn test_idempotency_key_is_sent() {
        let ctx = setup(FakeRemote::default(), true).await;
        let queued = ctx.engine.store().append_pending(&record(9)).await.unwrap();

        ctx.engine.sync_pending_data().await.unwrap();

        let created = ctx.remote.created.lock().unwrap().clone();
        assert_eq!(created, vec![(9, queued.idempotency_key)]);
    }

    #[tokio::test]
    async fn test_offline_drain_is_a_noop() {
        let ctx = setup(FakeRemote::default(), false).await;
        queue(&ctx, &[1]).await;

        let outcome = ctx.engine.sync_pending_data().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Skipped(SkipReason::Offline)));
        assert_eq!(ctx.remote.created_count(), 0);
        assert_eq!(ctx.engine.sync_runs(), 0);
    }

    #[tokio::test]
    async fn test_is_online_follows_monitor() {
        let ctx = setup(FakeRemote::default(), false).await;
        assert!(!ctx.engine.is_online());
        ctx.monitor.set_connected(true);
        assert!(ctx.engine.is_online());
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_single_flight() {
        let gate = Gate::closed();
        let remote = FakeRemote {
            gate: Some(gate.clone()),
            ..FakeRemote::default()
        };
        let ctx = setup(remote, true).await;
        queue(&ctx, &[1, 2]).await;

        let engine = ctx.engine.clone();
        let first = tokio::spawn(async move { engine.sync_pending_data().await });

        // Wait until the first run is inside the remote call.
        gate.entered.notified().await;
        assert!(ctx.engine.is_syncing());

        let second = ctx.engine.sync_pending_data().await.unwrap();
        assert!(matches!(second, SyncOutcome::Skipped(SkipReason::InProgress)));

        let views = ctx.engine.sync_views().await;
        assert!(matches!(views, Err(SyncError::Conflict)));

        gate.release.add_permits(10);
        let report = completed(first.await.unwrap().unwrap());
        assert_eq!(report.synced, 2);
        assert_eq!(ctx.remote.created_count(), 2);
        assert_eq!(ctx.engine.sync_runs(), 1);
        assert!(!ctx.engine.is_syncing());
    }

    #[tokio::test]
    async fn test_sync_views_replaces_installations_then_drains() {
        let remote = FakeRemote {
            installations: Some(vec![
                Installation::new(1, "M-1", "Ana Ruiz"),
                Installation::new(2, "M-2", "Luis Gómez"),
            ]),
            ..FakeRemote::default()
        };
        let ctx = setup(remote, true).await;
        queue(&ctx, &[1, 2]).await;

        let report = ctx.engine.sync_views().await.unwrap();
        assert_eq!(report.installations, 2);
        assert_eq!(report.pending.synced, 2);

        let installations = ctx.engine.store().list_installations().await.unwrap();
        assert_eq!(installations.len(), 2);
        assert!(!ctx.engine.is_syncing());
    }

    #[tokio::test]
    async fn test_sync_views_fetch_failure_leaves_everything() {
        let ctx = setup(FakeRemote::default(), true).await;
        ctx.engine
            .store()
            .replace_all_installations(&[Installation::new(8, "M-8", "Previa")])
            .await
            .unwrap();
        queue(&ctx, &[1]).await;

        let err = ctx.engine.sync_views().await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Connectivity(_))));
        assert!(!err.to_string().is_empty());

        let installations = ctx.engine.store().list_installations().await.unwrap();
        assert_eq!(installations, vec![Installation::new(8, "M-8", "Previa")]);
        assert_eq!(ctx.remote.created_count(), 0);
        assert!(!ctx.engine.is_syncing());

        // The run flag was released.
        let outcome = ctx.engine.sync_pending_data().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_sync_views_offline_fails_fast() {
        let remote = FakeRemote {
            installations: Some(vec![Installation::new(1, "M-1", "Ana Ruiz")]),
            ..FakeRemote::default()
        };
        let ctx = setup(remote, false).await;

        let err = ctx.engine.sync_views().await.unwrap_err();
        assert!(matches!(err, SyncError::Connectivity));
        assert!(ctx.engine.store().list_installations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_row_does_not_block_drain() {
        let ctx = setup(FakeRemote::default(), true).await;
        queue(&ctx, &[1]).await;
        let broken = sqlx::query(
            "INSERT INTO pending_consumptions (idempotency_key, sync_status, installation, payload, captured_at) VALUES (?, 'pending', 7, 'not json', ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&ctx.pool)
        .await
        .unwrap()
        .last_insert_rowid();
        queue(&ctx, &[2]).await;

        let report = completed(ctx.engine.sync_pending_data().await.unwrap());
        assert_eq!(report.attempted, 3);
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].local_id, broken);
        assert!(!report.failed[0].retryable);
        assert_eq!(ctx.remote.created_count(), 2);

        let batch = ctx.engine.store().scan_pending(SyncStatus::Pending).await.unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.unreadable.len(), 1);
    }

    #[tokio::test]
    async fn test_accepted_create_without_row_is_marked_synced() {
        let remote = FakeRemote {
            anonymous: HashSet::from([1]),
            ..FakeRemote::default()
        };
        let ctx = setup(remote, true).await;
        queue(&ctx, &[1, 2]).await;

        let first = completed(ctx.engine.sync_pending_data().await.unwrap());
        assert_eq!(first.synced, 2);
        assert!(first.failed.is_empty());

        let second = completed(ctx.engine.sync_pending_data().await.unwrap());
        assert_eq!(second.attempted, 0);
        assert_eq!(ctx.remote.created_count(), 2);

        // Only the upload that came back with a code has a committed row.
        let committed = ctx
            .engine
            .store()
            .query_consumptions(&acueducto_core::ConsumptionFilter::new())
            .await
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].record.installation, 2);
    }

    #[tokio::test]
    async fn test_http_create_without_code_is_sent_once() {
        use acueducto_core::HttpRemoteApi;
        use axum::{
            http::StatusCode,
            routing::{get, post},
            Json, Router,
        };
        use std::sync::atomic::AtomicUsize;

        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/consumo",
                post({
                    let hits = hits.clone();
                    move || async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::CREATED, Json(serde_json::json!({ "message": "ok" })))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        let store = LocalStore::new(pool);
        store.append_pending(&record(12)).await.unwrap();
        let monitor = NetworkMonitor::new(NetworkStatus { connected: true });
        let remote = Arc::new(HttpRemoteApi::new(format!("http://{addr}"), None).unwrap());
        let engine = SyncEngine::new(store, remote, monitor.subscribe());

        let first = completed(engine.sync_pending_data().await.unwrap());
        assert_eq!(first.synced, 1);
        assert!(first.failed.is_empty());

        let second = completed(engine.sync_pending_data().await.unwrap());
        assert_eq!(second.attempted, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(engine
            .store()
            .query_pending(SyncStatus::Pending)
            .await
            .unwrap()
            .is_empty());

        server.abort();
    }

    #[tokio::test]
    async fn test_local_failure_after_upload_keeps_record_pending() {
        let ctx = setup(FakeRemote::default(), true).await;
        sqlx::query(
            "CREATE TRIGGER refuse_installation_2 BEFORE INSERT ON consumptions \
             WHEN NEW.installation = 2 BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(&ctx.pool)
        .await
        .unwrap();
        queue(&ctx, &[1, 2, 3]).await;

        let report = completed(ctx.engine.sync_pending_data().await.unwrap());
        assert_eq!(report.attempted, 3);
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].retryable);
        assert!(report.failed[0].error.contains("promote_pending"));
        assert_eq!(ctx.remote.created_count(), 3);

        let still_pending = ctx
            .engine
            .store()
            .query_pending(SyncStatus::Pending)
            .await
            .unwrap();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].record.installation, 2);
        assert_eq!(still_pending[0].local_id, report.failed[0].local_id);
    }
}
