//! Local status overview

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::commands::load_config;
use crate::paths::Layout;
use crate::service_control::{ServiceController, SystemdController};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: StatusArgs) -> Result<()> {
    let (config, path) = load_config(args.config.as_deref())?;
    let layout = Layout::for_instance_type(&config.instance.instance_type);
    let controller = Arc::new(SystemdController);
    let http = reqwest::Client::new();

    println!("Instance:  {} ({})", config.instance.id, config.instance.instance_type);
    println!("Server:    {}", config.server.url);
    println!("Channel:   {}", config.update.channel);
    println!("Config:    {}", path.display());
    println!();
    println!(
        "{:<22} {:<12} {:<10} {:<8} {}",
        "PRODUCT", "VERSION", "STATE", "PID", "HEALTH"
    );

    for product in &config.products {
        let version = layout
            .current_version(&product.name)
            .unwrap_or_else(|| "-".to_string());
        let state = controller.status(&product.service);
        let pid = controller
            .pid(&product.service)
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_string());

        let health = if product.health_endpoint.is_empty() {
            "-".to_string()
        } else {
            match http
                .get(&product.health_endpoint)
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => "healthy".to_string(),
                _ => "unhealthy".to_string(),
            }
        };

        println!(
            "{:<22} {:<12} {:<10} {:<8} {}",
            product.name, version, state.to_string(), pid, health
        );
    }

    Ok(())
}
