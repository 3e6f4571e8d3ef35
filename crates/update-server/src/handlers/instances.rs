//! Instance endpoints for the dashboard and admin

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use updates_common::Instance;

use crate::auth::{RequireAdmin, RequireDashboard};
use crate::handlers::{ApiError, AppState};

pub async fn list_instances_handler(
    State(state): State<Arc<AppState>>,
    _dashboard: RequireDashboard,
) -> Result<Json<Vec<Instance>>, ApiError> {
    let instances = state.storage.list_instances().await?;

    Ok(Json(instances.into_iter().map(Instance::redacted).collect()))
}

pub async fn get_instance_handler(
    State(state): State<Arc<AppState>>,
    _dashboard: RequireDashboard,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    match state.storage.get_instance(&id).await? {
        Some(instance) => Ok(Json(instance.redacted())),
        None => Err(ApiError::not_found("instance not found")),
    }
}

pub async fn delete_instance_handler(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.storage.delete_instance(&id).await? {
        return Err(ApiError::not_found("instance not found"));
    }

    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
