mod consumption;
mod installation;

pub use consumption::{
    Consumption, ConsumptionFilter, ConsumptionRecord, PendingConsumption, SyncStatus,
};
pub use installation::Installation;
