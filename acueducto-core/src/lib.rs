//! Acueducto Core Library
//!
//! Shared types and logic for the Acueducto metering back office: the
//! consumption models, the normalization rules applied to captured
//! readings, the remote API client and the live change events.

pub mod clock;
pub mod error;
pub mod events;
pub mod models;
pub mod normalize;
pub mod remote;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{RemoteError, StorageError, SyncError, ValidationError};
pub use events::{parse_payload, ChangeEvent, CONSUMO_UPDATE};
pub use models::{
    Consumption, ConsumptionFilter, ConsumptionRecord, Installation, PendingConsumption,
    SyncStatus,
};
pub use normalize::normalize;
pub use remote::{HttpRemoteApi, RemoteApi};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
