//! Offline sweep
//!
//! Background task that transitions online instances to offline once their
//! last heartbeat is older than the configured threshold. A later heartbeat
//! flips them straight back to online.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::handlers::AppState;

pub async fn run(state: Arc<AppState>, shutdown: CancellationToken) {
    let interval = Duration::from_secs(state.config.sweep_interval_secs);
    let threshold = ChronoDuration::seconds(state.config.offline_after_secs as i64);

    info!(
        "Offline sweep running every {}s, threshold {}s",
        state.config.sweep_interval_secs, state.config.offline_after_secs
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Offline sweep stopped");
                return;
            }
            _ = ticker.tick() => {
                match state.storage.mark_offline_instances(threshold).await {
                    Ok(swept) if !swept.is_empty() => {
                        info!("Marked {} instance(s) offline: {}", swept.len(), swept.join(", "));
                    }
                    Ok(_) => {}
                    Err(err) => error!("Offline sweep failed: {}", err),
                }
            }
        }
    }
}
