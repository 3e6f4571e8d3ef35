//! mysoc-updater entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mysoc_updater::commands;

#[derive(Parser)]
#[command(name = "mysoc-updater", version)]
#[command(about = "Bootstrap, update, monitor and report on managed MySoc/SIEMCore instances")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize and bootstrap the updater from a license key
    Init(commands::init::InitArgs),
    /// Run the updater as a daemon
    Daemon(commands::daemon::DaemonArgs),
    /// Check for and apply updates
    Update(commands::update::UpdateArgs),
    /// Roll back a product to its previous version
    Rollback(commands::rollback::RollbackArgs),
    /// Show local product status
    Status(commands::status::StatusArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "mysoc_updater=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init(args) => commands::init::run(args).await,
        Commands::Daemon(args) => commands::daemon::run(args).await,
        Commands::Update(args) => commands::update::run(args).await,
        Commands::Rollback(args) => commands::rollback::run(args).await,
        Commands::Status(args) => commands::status::run(args).await,
    }
}
