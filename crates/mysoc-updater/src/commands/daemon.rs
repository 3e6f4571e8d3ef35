//! The long-running agent daemon
//!
//! Runs three cooperative loops sharing one cancellation token: the
//! heartbeat reporter, the update checker and the service monitor.
//! SIGINT/SIGTERM cancels all three and waits out a short grace period.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::load_config;
use crate::heartbeat::Reporter;
use crate::monitor::Monitor;
use crate::service_control::SystemdController;
use crate::update::Updater;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: DaemonArgs) -> Result<()> {
    let (config, path) = load_config(args.config.as_deref())?;

    info!(
        "mysoc-updater daemon v{} starting (config {})",
        env!("CARGO_PKG_VERSION"),
        path.display()
    );
    info!(
        "Instance: {} ({}), server {}",
        config.instance.id, config.instance.instance_type, config.server.url
    );

    let controller: Arc<SystemdController> = Arc::new(SystemdController);
    let shutdown = CancellationToken::new();

    let reporter = Arc::new(Reporter::new(config.clone(), controller.clone()));
    let updater = Arc::new(Updater::new(config.clone(), controller.clone()));
    let monitor = Arc::new(Monitor::new(config, controller));

    let tasks = vec![
        tokio::spawn(reporter.run(shutdown.child_token())),
        tokio::spawn(updater.run(shutdown.child_token())),
        tokio::spawn(monitor.run(shutdown.child_token())),
    ];
    info!("Heartbeat reporter, update checker and service monitor started");

    wait_for_signal().await;
    info!("Shutdown signal received, stopping...");
    shutdown.cancel();

    for task in tasks {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("A background task did not stop within the grace period");
        }
    }

    info!("Daemon stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
