use clap::Args;
use serde_json::{Map, Value};

use acueducto::config::Config;
use acueducto::db::LocalStore;
use acueducto_core::normalize;

/// Record a meter reading in the local queue
#[derive(Args)]
pub struct CaptureCommand {
    /// Installation code
    #[arg(long, short)]
    installation: String,

    /// Meter reading
    #[arg(long, short)]
    reading: String,

    /// Consumption for the period
    #[arg(long)]
    consumption: Option<String>,

    /// Billing month (default: 1)
    #[arg(long)]
    month: Option<String>,

    /// Billing year (default: current year)
    #[arg(long)]
    year: Option<String>,

    /// Reading date, YYYY-MM-DD (default: today)
    #[arg(long)]
    date: Option<String>,

    /// Meter code
    #[arg(long)]
    meter: Option<String>,

    /// Other charges for the period
    #[arg(long)]
    extra_charges: Option<String>,

    /// Reconnection charge
    #[arg(long)]
    reconnection: Option<String>,

    /// Operator (default: configured user)
    #[arg(long)]
    user: Option<String>,
}

impl CaptureCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let input = self.to_input(config);
        let mut record = normalize(&input, store.clock())?;

        if record.installation == 0 {
            return Err("Installation code must be a non-zero number".into());
        }

        // Fill in the meter code from reference data when not given.
        let installation = store.get_installation(record.installation).await?;
        if record.meter.is_empty() {
            if let Some(installation) = &installation {
                record.meter = installation.meter_code.clone();
            }
        }

        let pending = store.append_pending(&record).await?;
        println!("Captured reading:");
        println!("{}", pending);
        match installation {
            Some(installation) => println!("  {}", installation),
            None => println!("  (installation {} not in local list)", record.installation),
        }
        Ok(())
    }

    /// Raw capture form; normalization does the coercion.
    fn to_input(&self, config: &Config) -> Value {
        let user = self.user.clone().or_else(|| config.user.value.clone());
        let fields = [
            ("instalacion", Some(self.installation.clone())),
            ("lectura", Some(self.reading.clone())),
            ("consumo", self.consumption.clone()),
            ("mes", self.month.clone()),
            ("year", self.year.clone()),
            ("fecha", self.date.clone()),
            ("medidor", self.meter.clone()),
            ("otros_cobros", self.extra_charges.clone()),
            ("reconexion", self.reconnection.clone()),
            ("usuario", user),
        ];

        let map: Map<String, Value> = fields
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), Value::String(v))))
            .collect();
        Value::Object(map)
    }
}
