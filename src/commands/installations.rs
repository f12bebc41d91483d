use clap::Args;

use acueducto::db::LocalStore;

use super::OutputFormat;

/// List installations known to this device
#[derive(Args)]
pub struct InstallationsCommand {
    /// Show a single installation by code
    code: Option<i64>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl InstallationsCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        let installations = match self.code {
            Some(code) => match store.get_installation(code).await? {
                Some(installation) => vec![installation],
                None => return Err(format!("Installation not found: {}", code).into()),
            },
            None => store.list_installations().await?,
        };

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&installations)?);
            }
            OutputFormat::Text => {
                if installations.is_empty() {
                    println!("No installations. Run `acueducto sync-views` to download them.");
                    return Ok(());
                }
                for installation in &installations {
                    println!("{}", installation);
                }
            }
        }
        Ok(())
    }
}
