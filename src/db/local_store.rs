//! On-device storage for installations, committed consumptions and the
//! pending-consumption queue.
//!
//! Every method maps engine failures to [`StorageError`] tagged with the
//! method name, so nothing above this module sees a raw `sqlx::Error`.

use std::sync::Arc;

use acueducto_core::{
    normalize, Clock, Consumption, ConsumptionFilter, ConsumptionRecord, Installation,
    PendingConsumption, StorageError, SyncStatus, SystemClock,
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Result of a pending -> synced transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Updated,
    AlreadySynced,
    NotFound,
}

/// A queued row whose stored form could not be read back.
#[derive(Debug)]
pub struct UnreadablePending {
    pub local_id: i64,
    pub error: StorageError,
}

/// Queued records read row by row: one bad row does not hide the others.
#[derive(Debug, Default)]
pub struct PendingBatch {
    pub records: Vec<PendingConsumption>,
    pub unreadable: Vec<UnreadablePending>,
}

#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

#[derive(sqlx::FromRow)]
struct InstallationRow {
    code: i64,
    meter_code: String,
    name: String,
    address: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ConsumptionRow {
    code: i64,
    installation: i64,
    reading: f64,
    consumption: f64,
    month: i64,
    year: i64,
    date: String,
    meter: String,
    extra_charges: f64,
    reconnection: i64,
    user_id: String,
    name: Option<String>,
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    local_id: i64,
    idempotency_key: String,
    sync_status: String,
    payload: String,
    captured_at: String,
    synced_at: Option<String>,
}

impl From<InstallationRow> for Installation {
    fn from(row: InstallationRow) -> Self {
        Installation {
            code: row.code,
            meter_code: row.meter_code,
            name: row.name,
            address: row.address,
        }
    }
}

impl From<ConsumptionRow> for Consumption {
    fn from(row: ConsumptionRow) -> Self {
        Consumption {
            code: row.code,
            name: row.name,
            record: ConsumptionRecord {
                installation: row.installation,
                reading: row.reading,
                consumption: row.consumption,
                month: row.month,
                year: row.year,
                date: row.date,
                meter: row.meter,
                extra_charges: row.extra_charges,
                reconnection: row.reconnection,
                user: row.user_id,
            },
        }
    }
}

fn failed(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StorageError {
    move |e| StorageError::new(operation, e)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// The clock supplies defaults when re-normalizing stored payloads.
    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ------------------------------------------------------------------
    // Installations
    // ------------------------------------------------------------------

    /// Clears the installation set and inserts `installations` in one
    /// transaction. On any error the previous set is left untouched.
    pub async fn replace_all_installations(
        &self,
        installations: &[Installation],
    ) -> Result<usize, StorageError> {
        const OP: &str = "replace_all_installations";

        let mut tx = self.pool.begin().await.map_err(failed(OP))?;

        sqlx::query("DELETE FROM installations")
            .execute(&mut *tx)
            .await
            .map_err(failed(OP))?;

        for installation in installations {
            sqlx::query(
                "INSERT INTO installations (code, meter_code, name, address) VALUES (?, ?, ?, ?)",
            )
            .bind(installation.code)
            .bind(&installation.meter_code)
            .bind(&installation.name)
            .bind(&installation.address)
            .execute(&mut *tx)
            .await
            .map_err(failed(OP))?;
        }

        tx.commit().await.map_err(failed(OP))?;

        Ok(installations.len())
    }

    pub async fn list_installations(&self) -> Result<Vec<Installation>, StorageError> {
        let rows: Vec<InstallationRow> =
            sqlx::query_as("SELECT code, meter_code, name, address FROM installations ORDER BY code")
                .fetch_all(&self.pool)
                .await
                .map_err(failed("list_installations"))?;

        Ok(rows.into_iter().map(Installation::from).collect())
    }

    pub async fn get_installation(&self, code: i64) -> Result<Option<Installation>, StorageError> {
        let row: Option<InstallationRow> = sqlx::query_as(
            "SELECT code, meter_code, name, address FROM installations WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("get_installation"))?;

        Ok(row.map(Installation::from))
    }

    // ------------------------------------------------------------------
    // Pending queue
    // ------------------------------------------------------------------

    /// Queues a normalized reading with a fresh local id and idempotency key.
    pub async fn append_pending(
        &self,
        record: &ConsumptionRecord,
    ) -> Result<PendingConsumption, StorageError> {
        const OP: &str = "append_pending";

        let idempotency_key = Uuid::new_v4();
        let payload = serde_json::to_string(record).map_err(|e| StorageError::new(OP, e))?;
        let captured_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO pending_consumptions (idempotency_key, sync_status, installation, payload, captured_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(idempotency_key.to_string())
        .bind(SyncStatus::Pending.as_str())
        .bind(record.installation)
        .bind(&payload)
        .bind(captured_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(failed(OP))?;

        Ok(PendingConsumption {
            local_id: result.last_insert_rowid(),
            idempotency_key,
            sync_status: SyncStatus::Pending,
            record: record.clone(),
            captured_at,
            synced_at: None,
        })
    }

    /// All queued records with the given status. Order is not significant.
    ///
    /// Fails if any matching row cannot be read; see
    /// [`LocalStore::scan_pending`] for a row-by-row read.
    pub async fn query_pending(
        &self,
        status: SyncStatus,
    ) -> Result<Vec<PendingConsumption>, StorageError> {
        const OP: &str = "query_pending";

        self.pending_rows(status, OP)
            .await?
            .into_iter()
            .map(|row| self.hydrate(row, OP))
            .collect()
    }

    /// Like [`LocalStore::query_pending`], but rows that cannot be read are
    /// reported alongside the good ones instead of failing the whole read.
    pub async fn scan_pending(&self, status: SyncStatus) -> Result<PendingBatch, StorageError> {
        const OP: &str = "scan_pending";

        let mut batch = PendingBatch::default();
        for row in self.pending_rows(status, OP).await? {
            let local_id = row.local_id;
            match self.hydrate(row, OP) {
                Ok(record) => batch.records.push(record),
                Err(error) => batch.unreadable.push(UnreadablePending { local_id, error }),
            }
        }
        Ok(batch)
    }

    async fn pending_rows(
        &self,
        status: SyncStatus,
        op: &'static str,
    ) -> Result<Vec<PendingRow>, StorageError> {
        sqlx::query_as(
            r#"
            SELECT local_id, idempotency_key, sync_status, payload, captured_at, synced_at
            FROM pending_consumptions WHERE sync_status = ? ORDER BY local_id
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(failed(op))
    }

    /// Every queued record, pending and synced.
    pub async fn list_pending(&self) -> Result<Vec<PendingConsumption>, StorageError> {
        const OP: &str = "list_pending";

        let rows: Vec<PendingRow> = sqlx::query_as(
            r#"
            SELECT local_id, idempotency_key, sync_status, payload, captured_at, synced_at
            FROM pending_consumptions ORDER BY local_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(failed(OP))?;

        rows.into_iter().map(|row| self.hydrate(row, OP)).collect()
    }

    /// Moves a queued record from pending to synced.
    ///
    /// Calling it again, or for an id that does not exist, is not an error.
    pub async fn mark_synced(&self, local_id: i64) -> Result<MarkOutcome, StorageError> {
        const OP: &str = "mark_synced";

        let mut conn = self.pool.acquire().await.map_err(failed(OP))?;
        set_synced(&mut conn, local_id).await.map_err(failed(OP))
    }

    /// Stores the server's copy of a synced reading and marks the queued
    /// record synced, atomically.
    pub async fn promote_pending(
        &self,
        local_id: i64,
        committed: &Consumption,
    ) -> Result<MarkOutcome, StorageError> {
        const OP: &str = "promote_pending";

        let mut tx = self.pool.begin().await.map_err(failed(OP))?;
        upsert_consumption(&mut tx, committed)
            .await
            .map_err(failed(OP))?;
        let outcome = set_synced(&mut tx, local_id).await.map_err(failed(OP))?;
        tx.commit().await.map_err(failed(OP))?;

        Ok(outcome)
    }

    /// Re-normalizes the stored payload so fields missing from older rows
    /// pick up their defaults.
    fn hydrate(&self, row: PendingRow, op: &'static str) -> Result<PendingConsumption, StorageError> {
        let payload: serde_json::Value =
            serde_json::from_str(&row.payload).map_err(|e| StorageError::new(op, e))?;
        let record = normalize(&payload, self.clock.as_ref()).map_err(|e| StorageError::new(op, e))?;
        let idempotency_key =
            Uuid::parse_str(&row.idempotency_key).map_err(|e| StorageError::new(op, e))?;
        let sync_status = SyncStatus::parse(&row.sync_status).ok_or_else(|| {
            StorageError::new(op, format!("unknown sync status '{}'", row.sync_status))
        })?;

        Ok(PendingConsumption {
            local_id: row.local_id,
            idempotency_key,
            sync_status,
            record,
            captured_at: parse_timestamp(&row.captured_at).unwrap_or_else(Utc::now),
            synced_at: row.synced_at.as_deref().and_then(parse_timestamp),
        })
    }

    // ------------------------------------------------------------------
    // Committed consumptions
    // ------------------------------------------------------------------

    /// Inserts or replaces authoritative consumptions by code.
    pub async fn upsert_consumptions(
        &self,
        consumptions: &[Consumption],
    ) -> Result<usize, StorageError> {
        const OP: &str = "upsert_consumptions";

        let mut tx = self.pool.begin().await.map_err(failed(OP))?;
        for consumption in consumptions {
            upsert_consumption(&mut tx, consumption)
                .await
                .map_err(failed(OP))?;
        }
        tx.commit().await.map_err(failed(OP))?;

        Ok(consumptions.len())
    }

    pub async fn query_consumptions(
        &self,
        filter: &ConsumptionFilter,
    ) -> Result<Vec<Consumption>, StorageError> {
        let mut query = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT code, installation, reading, consumption, month, year, date, meter,
                   extra_charges, reconnection, user_id, name
            FROM consumptions WHERE 1 = 1
            "#,
        );

        if let Some(year) = filter.year {
            query.push(" AND year = ").push_bind(year);
        }
        if let Some(month) = filter.month {
            query.push(" AND month = ").push_bind(month);
        }
        if let Some(installation) = filter.installation {
            query.push(" AND installation = ").push_bind(installation);
        }
        query.push(" ORDER BY year DESC, month DESC, installation, code");

        let rows: Vec<ConsumptionRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(failed("query_consumptions"))?;

        // Name matching is done here so it is Unicode-aware.
        Ok(rows
            .into_iter()
            .map(Consumption::from)
            .filter(|c| filter.matches(c))
            .collect())
    }
}

async fn set_synced(conn: &mut SqliteConnection, local_id: i64) -> Result<MarkOutcome, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE pending_consumptions SET sync_status = ?, synced_at = ? WHERE local_id = ? AND sync_status = ?",
    )
    .bind(SyncStatus::Synced.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(local_id)
    .bind(SyncStatus::Pending.as_str())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated > 0 {
        return Ok(MarkOutcome::Updated);
    }

    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT local_id FROM pending_consumptions WHERE local_id = ?")
            .bind(local_id)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(match exists {
        Some(_) => MarkOutcome::AlreadySynced,
        None => MarkOutcome::NotFound,
    })
}

async fn upsert_consumption(
    conn: &mut SqliteConnection,
    consumption: &Consumption,
) -> Result<(), sqlx::Error> {
    let r = &consumption.record;
    sqlx::query(
        r#"
        INSERT INTO consumptions (code, installation, reading, consumption, month, year, date, meter,
                                  extra_charges, reconnection, user_id, name)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(code) DO UPDATE SET
            installation = excluded.installation,
            reading = excluded.reading,
            consumption = excluded.consumption,
            month = excluded.month,
            year = excluded.year,
            date = excluded.date,
            meter = excluded.meter,
            extra_charges = excluded.extra_charges,
            reconnection = excluded.reconnection,
            user_id = excluded.user_id,
            name = COALESCE(excluded.name, consumptions.name)
        "#,
    )
    .bind(consumption.code)
    .bind(r.installation)
    .bind(r.reading)
    .bind(r.consumption)
    .bind(r.month)
    .bind(r.year)
    .bind(&r.date)
    .bind(&r.meter)
    .bind(r.extra_charges)
    .bind(r.reconnection)
    .bind(&r.user)
    .bind(&consumption.name)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
