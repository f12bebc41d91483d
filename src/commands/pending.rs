use clap::Args;

use acueducto::db::LocalStore;
use acueducto_core::SyncStatus;

use super::OutputFormat;

/// List readings captured on this device
#[derive(Args)]
pub struct PendingCommand {
    /// Include readings that were already synced
    #[arg(long, short)]
    all: bool,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl PendingCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        let records = if self.all {
            store.list_pending().await?
        } else {
            store.query_pending(SyncStatus::Pending).await?
        };

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
            OutputFormat::Text => {
                if records.is_empty() {
                    println!("No pending readings.");
                    return Ok(());
                }
                for record in &records {
                    println!("{}", record);
                }
                let waiting = records.iter().filter(|r| !r.is_synced()).count();
                println!();
                println!("{} reading(s) waiting to sync", waiting);
            }
        }
        Ok(())
    }
}
