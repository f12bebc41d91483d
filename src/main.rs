use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use acueducto::config::Config;
use acueducto::db::{init_db, LocalStore};
use commands::{
    CaptureCommand, ConfigCommand, ConsumptionsCommand, InstallationsCommand, PendingCommand,
    SyncCommand, SyncViewsCommand, WatchCommand,
};

#[derive(Parser)]
#[command(name = "acueducto")]
#[command(version)]
#[command(about = "Capture meter readings offline and sync them later", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a meter reading
    Capture(CaptureCommand),

    /// List captured readings
    Pending(PendingCommand),

    /// Upload pending readings
    Sync(SyncCommand),

    /// Refresh installations and upload pending readings
    SyncViews(SyncViewsCommand),

    /// List installations
    Installations(InstallationsCommand),

    /// Search committed consumptions
    Consumptions(ConsumptionsCommand),

    /// Sync automatically whenever the connection comes back
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acueducto=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let Some(command) = cli.command else {
        println!("Use --help to see available commands");
        return Ok(());
    };

    if let Commands::Config(cmd) = &command {
        return cmd.run(&config);
    }

    let pool = init_db(&config.database_path.value).await?;
    let store = LocalStore::new(pool.clone());

    match command {
        Commands::Capture(cmd) => cmd.run(&store, &config).await?,
        Commands::Pending(cmd) => cmd.run(&store).await?,
        Commands::Sync(cmd) => cmd.run(&pool, &config).await?,
        Commands::SyncViews(cmd) => cmd.run(&pool, &config).await?,
        Commands::Installations(cmd) => cmd.run(&store).await?,
        Commands::Consumptions(cmd) => cmd.run(&store).await?,
        Commands::Watch(cmd) => cmd.run(&pool, &config).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}
