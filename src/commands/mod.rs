mod capture;
mod config_cmd;
mod consumptions;
mod installations;
mod pending;
mod sync_cmd;

use clap::ValueEnum;

pub use capture::CaptureCommand;
pub use config_cmd::ConfigCommand;
pub use consumptions::ConsumptionsCommand;
pub use installations::InstallationsCommand;
pub use pending::PendingCommand;
pub use sync_cmd::{SyncCommand, SyncViewsCommand, WatchCommand};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
