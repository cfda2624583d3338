//! gpuyield CLI
//!
//! Command-line client for the gpuyield daemon.

mod commands;

use clap::{Parser, Subcommand};
use gpuyield_core::DeviceId;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// gpuyield - claim GPUs from the background workload
#[derive(Parser, Debug)]
#[command(name = "gpuyield")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:5000", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mark GPUs as occupied, moving the workload off them
    Claim {
        /// GPU ids to claim (e.g. 1 2)
        gpu_ids: Vec<DeviceId>,
    },

    /// List GPUs the daemon believes are free
    Free,

    /// Show the daemon's controller status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Claim { gpu_ids } => {
            commands::claim(&client, gpu_ids).await?;
        }
        Commands::Free => {
            commands::free(&client).await?;
        }
        Commands::Status => {
            commands::status(&client).await?;
        }
    }

    Ok(())
}
