use clap::{Args, Subcommand};

use acueducto::config::{Config, ConfigValue};

use super::OutputFormat;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!(
                            "database_path: {}",
                            config.database_path.value.display()
                        );
                        println!("  source: {}", config.database_path.source);
                        println!();

                        print_optional("server_url", &config.server_url);
                        print_token(&config.api_token);
                        print_optional("user", &config.user);

                        println!(
                            "request_timeout_secs: {}",
                            config.request_timeout_secs.value
                        );
                        println!("  source: {}", config.request_timeout_secs.source);
                        println!();

                        println!(
                            "probe_interval_secs: {}",
                            config.probe_interval_secs.value
                        );
                        println!("  source: {}", config.probe_interval_secs.source);
                    }
                }
                Ok(())
            }
        }
    }
}

fn print_optional(key: &str, value: &ConfigValue<Option<String>>) {
    println!("{}: {}", key, value.value.as_deref().unwrap_or("(not set)"));
    println!("  source: {}", value.source);
    println!();
}

fn print_token(token: &ConfigValue<Option<String>>) {
    match token.value.as_deref() {
        Some(t) => {
            let shown: String = t.chars().take(4).collect();
            println!("api_token: {}...", shown);
        }
        None => println!("api_token: (not set)"),
    }
    println!("  source: {}", token.source);
    println!();
}
