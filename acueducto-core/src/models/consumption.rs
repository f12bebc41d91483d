use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The canonical shape of one billing-period reading.
///
/// This is what normalization produces and what the remote API accepts on
/// create. Field names on the wire follow the billing backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    #[serde(rename = "instalacion")]
    pub installation: i64,
    #[serde(rename = "lectura")]
    pub reading: f64,
    #[serde(rename = "consumo")]
    pub consumption: f64,
    #[serde(rename = "mes")]
    pub month: i64,
    pub year: i64,
    #[serde(rename = "fecha")]
    pub date: String,
    #[serde(rename = "medidor")]
    pub meter: String,
    #[serde(rename = "otros_cobros")]
    pub extra_charges: f64,
    #[serde(rename = "reconexion")]
    pub reconnection: i64,
    #[serde(rename = "usuario")]
    pub user: String,
}

/// A reading the server has accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    #[serde(rename = "codigo")]
    pub code: i64,
    /// Name of the installation holder, when the server view provides it.
    #[serde(rename = "nombre", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub record: ConsumptionRecord,
}

impl fmt::Display for Consumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.record;
        write!(
            f,
            "#{:<6} inst {:<6} {:04}-{:02}  reading {:>10.2}  consumption {:>8.2}  {}",
            self.code, r.installation, r.year, r.month, r.reading, r.consumption, r.date
        )?;
        if let Some(name) = &self.name {
            write!(f, "  {}", name)?;
        }
        Ok(())
    }
}

/// Whether a locally captured reading has been acknowledged by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }

    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reading captured on this device, queued for the server.
///
/// It is shown to the user right away but is not authoritative until
/// `sync_status` is [`SyncStatus::Synced`]. Records are kept after syncing
/// as an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingConsumption {
    pub local_id: i64,
    /// Sent with the remote create so a retried upload is not stored twice.
    pub idempotency_key: Uuid,
    pub sync_status: SyncStatus,
    pub record: ConsumptionRecord,
    pub captured_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl PendingConsumption {
    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced
    }
}

impl fmt::Display for PendingConsumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.record;
        write!(
            f,
            "[{}] local #{:<4} inst {:<6} {:04}-{:02}  reading {:>10.2}  {}",
            self.sync_status, self.local_id, r.installation, r.year, r.month, r.reading, r.date
        )
    }
}

/// Query over committed consumptions. Unset fields impose no constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumptionFilter {
    pub year: Option<i64>,
    pub month: Option<i64>,
    /// Case-insensitive substring of the holder name.
    pub name: Option<String>,
    pub installation: Option<i64>,
}

impl ConsumptionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn year(mut self, year: i64) -> Self {
        self.year = Some(year);
        self
    }

    pub fn month(mut self, month: i64) -> Self {
        self.month = Some(month);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn installation(mut self, installation: i64) -> Self {
        self.installation = Some(installation);
        self
    }

    /// Returns true if the consumption satisfies every set field.
    pub fn matches(&self, consumption: &Consumption) -> bool {
        let r = &consumption.record;
        if self.year.is_some_and(|y| r.year != y) {
            return false;
        }
        if self.month.is_some_and(|m| r.month != m) {
            return false;
        }
        if self.installation.is_some_and(|i| r.installation != i) {
            return false;
        }
        match &self.name {
            Some(needle) if !needle.is_empty() => consumption
                .name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(&needle.to_lowercase())),
            _ => true,
        }
    }
}
