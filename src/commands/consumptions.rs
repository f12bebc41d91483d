use clap::Args;

use acueducto::db::LocalStore;
use acueducto_core::ConsumptionFilter;

use super::OutputFormat;

/// Search committed consumptions
#[derive(Args)]
pub struct ConsumptionsCommand {
    /// Billing year
    #[arg(long, short)]
    year: Option<i64>,

    /// Billing month
    #[arg(long, short)]
    month: Option<i64>,

    /// Holder name (case-insensitive substring)
    #[arg(long, short)]
    name: Option<String>,

    /// Installation code
    #[arg(long, short)]
    installation: Option<i64>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl ConsumptionsCommand {
    fn filter(&self) -> ConsumptionFilter {
        let mut filter = ConsumptionFilter::new();
        if let Some(year) = self.year {
            filter = filter.year(year);
        }
        if let Some(month) = self.month {
            filter = filter.month(month);
        }
        if let Some(name) = &self.name {
            filter = filter.name(name.trim());
        }
        if let Some(installation) = self.installation {
            filter = filter.installation(installation);
        }
        filter
    }

    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        let consumptions = store.query_consumptions(&self.filter()).await?;

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&consumptions)?);
            }
            OutputFormat::Text => {
                if consumptions.is_empty() {
                    println!("No consumptions found.");
                    return Ok(());
                }
                for consumption in &consumptions {
                    println!("{}", consumption);
                }
            }
        }
        Ok(())
    }
}
