//! Heartbeat intake
//!
//! Records the agent's snapshot against its instance and answers with any
//! pending update offers. Strictly read-only with respect to the catalog.

use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::debug;

use updates_common::{Heartbeat, HeartbeatResponse, ReleaseInfo};

use crate::handlers::{ApiError, AppState};

pub async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    Json(heartbeat): Json<Heartbeat>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    if heartbeat.instance_id.is_empty() {
        return Err(ApiError::bad_request("instance_id is required"));
    }

    // A heartbeat from an unregistered instance is recorded nowhere; the
    // agent must re-activate to reappear. Not an error.
    if !state
        .storage
        .apply_heartbeat(&heartbeat.instance_id, &heartbeat)
        .await?
    {
        debug!("Dropped heartbeat from unknown instance {}", heartbeat.instance_id);
    }

    let mut updates: Vec<ReleaseInfo> = Vec::new();
    for product in &heartbeat.products {
        let Some(release) = state
            .storage
            .latest_release(&product.name, product.channel)
            .await?
        else {
            continue;
        };
        let info = ReleaseInfo::for_release(&release, &product.version);
        if info.update_available {
            updates.push(info);
        }
    }

    Ok(Json(HeartbeatResponse {
        status: "ok".to_string(),
        updates,
    }))
}
