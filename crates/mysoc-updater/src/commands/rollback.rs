//! Restore a product to its previous version

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use crate::commands::load_config;
use crate::service_control::SystemdController;
use crate::update::Updater;

#[derive(Debug, Args)]
pub struct RollbackArgs {
    /// Product to roll back
    pub product: String,

    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: RollbackArgs) -> Result<()> {
    let (config, _) = load_config(args.config.as_deref())?;

    let product = config
        .product(&args.product)
        .with_context(|| format!("product '{}' not found in configuration", args.product))?
        .clone();

    let updater = Updater::new(config, Arc::new(SystemdController));

    println!("Rolling back {}...", args.product);
    let version = updater.rollback(&product).await?;
    println!("Rolled back {} to {}", args.product, version);

    Ok(())
}
