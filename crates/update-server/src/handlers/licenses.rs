//! License endpoints: activation, validation and admin CRUD

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use updates_common::{ActivationRequest, License, LicenseLimits};

use crate::auth::{RequireAdmin, RequireDashboard};
use crate::handlers::{ApiError, AppState};
use crate::licensing;

/// Activate a license on a host, issuing instance credentials and an
/// install manifest. Policy refusals are a 400 with `success: false`.
pub async fn activate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ActivationRequest>,
) -> Result<Response, ApiError> {
    if payload.license_key.is_empty() {
        return Err(ApiError::bad_request("license_key is required"));
    }

    let response =
        licensing::activate(&state.storage, &state.activation_locks, &payload).await?;

    if response.success {
        Ok(Json(response).into_response())
    } else {
        Ok((StatusCode::BAD_REQUEST, Json(response)).into_response())
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub license_key: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only license probe. Always answers 200; `valid` carries the verdict.
/// Never attempts any binding.
pub async fn validate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let Some(license) = state.storage.get_license_by_key(&payload.license_key).await? else {
        return Ok(Json(ValidateResponse {
            valid: false,
            license: None,
            expires_at: None,
            error: Some("license not found".to_string()),
        }));
    };

    let valid = license.is_active && !license.is_expired(Utc::now());
    let expires_at = license.expires_at;

    Ok(Json(ValidateResponse {
        valid,
        expires_at: Some(expires_at),
        license: Some(license),
        error: None,
    }))
}

/// Request to create a license
#[derive(Debug, Deserialize)]
pub struct CreateLicenseRequest {
    /// Key prefix, defaulted from the license type when absent
    #[serde(default)]
    pub prefix: String,

    pub customer_id: String,
    pub customer_name: String,

    #[serde(rename = "type")]
    pub license_type: String,

    #[serde(default)]
    pub products: Vec<String>,

    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default)]
    pub limits: LicenseLimits,

    pub expires_at: DateTime<Utc>,
}

pub async fn create_license_handler(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Json(payload): Json<CreateLicenseRequest>,
) -> Result<(StatusCode, Json<License>), ApiError> {
    if payload.customer_id.is_empty() || payload.customer_name.is_empty() || payload.license_type.is_empty() {
        return Err(ApiError::bad_request(
            "customer_id, customer_name, and type are required",
        ));
    }

    let prefix = if payload.prefix.is_empty() {
        licensing::key_prefix_for(&payload.license_type).to_string()
    } else {
        payload.prefix.clone()
    };

    let now = Utc::now();
    let license = License {
        id: Uuid::new_v4().to_string(),
        license_key: licensing::generate_license_key(&prefix),
        customer_id: payload.customer_id,
        customer_name: payload.customer_name,
        license_type: payload.license_type,
        products: payload.products,
        features: payload.features,
        limits: payload.limits,
        issued_at: now,
        expires_at: payload.expires_at,
        bound_to: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    state.storage.create_license(&license).await?;

    info!("Issued license {} to {}", license.license_key, license.customer_name);
    Ok((StatusCode::CREATED, Json(license)))
}

pub async fn list_licenses_handler(
    State(state): State<Arc<AppState>>,
    _dashboard: RequireDashboard,
) -> Result<Json<Vec<License>>, ApiError> {
    let licenses = state.storage.list_licenses().await?;
    Ok(Json(licenses))
}

pub async fn get_license_handler(
    State(state): State<Arc<AppState>>,
    _dashboard: RequireDashboard,
    Path(id): Path<String>,
) -> Result<Json<License>, ApiError> {
    match state.storage.get_license(&id).await? {
        Some(license) => Ok(Json(license)),
        None => Err(ApiError::not_found("license not found")),
    }
}

/// Partial license update
#[derive(Debug, Deserialize)]
pub struct UpdateLicenseRequest {
    pub customer_name: Option<String>,
    pub is_active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn update_license_handler(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
    Json(payload): Json<UpdateLicenseRequest>,
) -> Result<Json<License>, ApiError> {
    let Some(mut license) = state.storage.get_license(&id).await? else {
        return Err(ApiError::not_found("license not found"));
    };

    if let Some(name) = payload.customer_name {
        license.customer_name = name;
    }
    if let Some(active) = payload.is_active {
        license.is_active = active;
    }
    if let Some(expires_at) = payload.expires_at {
        license.expires_at = expires_at;
    }
    license.updated_at = Utc::now();

    state.storage.update_license(&license).await?;
    Ok(Json(license))
}

pub async fn delete_license_handler(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.storage.delete_license(&id).await? {
        return Err(ApiError::not_found("license not found"));
    }

    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
