//! One-shot update check and apply

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use crate::commands::load_config;
use crate::service_control::SystemdController;
use crate::update::Updater;

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Products to update (all configured products when omitted)
    pub products: Vec<String>,

    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Apply even when the server reports no update available
    #[arg(short, long)]
    pub force: bool,
}

pub async fn run(args: UpdateArgs) -> Result<()> {
    let (config, _) = load_config(args.config.as_deref())?;

    let products: Vec<String> = if args.products.is_empty() {
        config.products.iter().map(|p| p.name.clone()).collect()
    } else {
        args.products.clone()
    };

    let updater = Updater::new(config.clone(), Arc::new(SystemdController));

    println!("Checking for updates...");

    for name in products {
        println!();
        println!("{}:", name);

        let Some(product) = config.product(&name) else {
            println!("  not found in configuration");
            continue;
        };

        let info = match updater.check(&name).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                println!("  no releases found");
                continue;
            }
            Err(err) => {
                println!("  check failed: {:#}", err);
                continue;
            }
        };

        if !info.update_available && !args.force {
            println!("  already up to date ({})", info.latest_version);
            continue;
        }

        if info.current_version.is_empty() {
            println!("  installing {}", info.latest_version);
        } else {
            println!("  {} -> {}", info.current_version, info.latest_version);
        }

        match updater.apply(product, &info).await {
            Ok(()) => println!("  updated to {}", info.latest_version),
            Err(err) => println!("  update failed: {:#}", err),
        }
    }

    println!();
    println!("Update check complete.");
    Ok(())
}
