//! Release catalog endpoints: upload, lookup and artifact downloads

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use updates_common::{Artifact, Channel, Manifest, Release, ReleaseInfo};

use crate::artifacts::{artifact_filename, StagedArtifact};
use crate::auth::RequireAdmin;
use crate::handlers::{ApiError, AppState};

/// Upload a new release (multipart: `product`, `version`, `channel`,
/// `release_notes`, `artifact`). The artifact streams into the blob store
/// while its SHA-256 is computed; the client's checksum is never trusted.
/// A duplicate `(product, version)` is refused with 409 before any catalog
/// write.
pub async fn upload_release_handler(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Release>), ApiError> {
    let mut product = String::new();
    let mut version = String::new();
    let mut channel = String::new();
    let mut release_notes = String::new();
    let mut staged: Option<(StagedArtifact, String, i64, String)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("failed to parse form: {}", err)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("product") => product = read_text(field).await?,
            Some("version") => version = read_text(field).await?,
            Some("channel") => channel = read_text(field).await?,
            Some("release_notes") => release_notes = read_text(field).await?,
            Some("artifact") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::bad_request("artifact filename is required"))?;

                let mut artifact = state.artifacts.stage().await?;
                let mut hasher = Sha256::new();
                let mut size: i64 = 0;

                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|err| ApiError::bad_request(format!("failed to read artifact: {}", err)))?
                {
                    hasher.update(&chunk);
                    size += chunk.len() as i64;
                    if let Err(err) = artifact.file.write_all(&chunk).await {
                        state.artifacts.discard(artifact).await;
                        return Err(ApiError::internal(format!("failed to save artifact: {}", err)));
                    }
                }

                if let Err(err) = artifact.file.flush().await {
                    state.artifacts.discard(artifact).await;
                    return Err(ApiError::internal(format!("failed to save artifact: {}", err)));
                }

                let checksum = hex::encode(hasher.finalize());
                staged = Some((artifact, filename, size, checksum));
            }
            _ => {}
        }
    }

    let Some((artifact, filename, size, checksum)) = staged else {
        return Err(ApiError::bad_request("artifact file is required"));
    };

    if product.is_empty() || version.is_empty() {
        state.artifacts.discard(artifact).await;
        return Err(ApiError::bad_request("product and version are required"));
    }

    let channel = if channel.is_empty() {
        Channel::Stable
    } else {
        match Channel::from_str(&channel) {
            Ok(channel) => channel,
            Err(err) => {
                state.artifacts.discard(artifact).await;
                return Err(ApiError::bad_request(err.to_string()));
            }
        }
    };

    if state.storage.release_exists(&product, &version).await? {
        state.artifacts.discard(artifact).await;
        return Err(ApiError::conflict(format!(
            "release {} {} already exists",
            product, version
        )));
    }

    let artifact_path = match state.artifacts.commit(artifact, &product, &version, &filename).await
    {
        Ok(path) => path,
        Err(err) => return Err(ApiError::internal(format!("failed to save artifact: {}", err))),
    };

    let now = Utc::now();
    let release = Release {
        id: Uuid::new_v4().to_string(),
        product_name: product.clone(),
        version: version.clone(),
        channel,
        manifest: Manifest {
            product: product.clone(),
            version: version.clone(),
            channel,
            artifacts: vec![Artifact {
                name: filename.clone(),
                arch: String::new(),
                size,
                checksum: checksum.clone(),
            }],
            dependencies: vec![],
            changelog: String::new(),
        },
        artifact_path,
        artifact_size: size,
        checksum,
        signature: None,
        release_notes,
        min_updater_version: String::new(),
        released_at: now,
        created_at: now,
    };

    if let Err(err) = state.storage.create_release(&release).await {
        // Compensate: the blob must not outlive a failed catalog insert.
        if let Err(cleanup) = state.artifacts.delete(&product, &version, &filename).await {
            warn!("Failed to clean up artifact after catalog error: {}", cleanup);
        }
        return Err(err.into());
    }

    info!("Uploaded release {} {} ({} bytes)", product, version, size);
    Ok((StatusCode::CREATED, Json(release)))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|err| ApiError::bad_request(format!("failed to parse form: {}", err)))
}

/// Upload one additional binary for an existing version (per-arch builds).
/// Streams the raw body into the blob store; no new catalog row is created.
pub async fn upload_binary_handler(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path((product, version, filename)): Path<(String, String, String)>,
    body: Body,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut staged = state.artifacts.stage().await?;
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|err| ApiError::bad_request(format!("failed to read body: {}", err)))?;
        if let Err(err) = staged.file.write_all(&chunk).await {
            state.artifacts.discard(staged).await;
            return Err(ApiError::internal(format!("failed to save binary: {}", err)));
        }
    }

    if let Err(err) = staged.file.flush().await {
        state.artifacts.discard(staged).await;
        return Err(ApiError::internal(format!("failed to save binary: {}", err)));
    }

    let path = state
        .artifacts
        .commit(staged, &product, &version, &filename)
        .await
        .map_err(|err| ApiError::internal(format!("failed to save binary: {}", err)))?;

    info!("Stored binary {}/{}/{}", product, version, filename);

    Ok(Json(serde_json::json!({
        "status": "uploaded",
        "product": product,
        "version": version,
        "filename": filename,
        "path": path,
        "download_url": format!("/{}/{}/{}", product, version, filename),
    })))
}

pub async fn list_releases_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Release>>, ApiError> {
    let releases = state.storage.list_releases().await?;
    Ok(Json(releases))
}

pub async fn list_product_releases_handler(
    State(state): State<Arc<AppState>>,
    Path(product): Path<String>,
) -> Result<Json<Vec<Release>>, ApiError> {
    let releases = state.storage.list_product_releases(&product).await?;
    Ok(Json(releases))
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    #[serde(default)]
    pub channel: Option<String>,

    #[serde(default)]
    pub current_version: Option<String>,
}

/// Latest release on a channel, relative to the caller's current version
pub async fn latest_release_handler(
    State(state): State<Arc<AppState>>,
    Path(product): Path<String>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<ReleaseInfo>, ApiError> {
    let channel = match query.channel.as_deref() {
        Some(raw) if !raw.is_empty() => {
            Channel::from_str(raw).map_err(|err| ApiError::bad_request(err.to_string()))?
        }
        _ => Channel::Stable,
    };
    let current_version = query.current_version.unwrap_or_default();

    match state.storage.latest_release(&product, channel).await? {
        Some(release) => Ok(Json(ReleaseInfo::for_release(&release, &current_version))),
        None => Err(ApiError::not_found("no releases found for product")),
    }
}

pub async fn get_release_handler(
    State(state): State<Arc<AppState>>,
    Path((product, version)): Path<(String, String)>,
) -> Result<Json<Release>, ApiError> {
    match state.storage.get_release(&product, &version).await? {
        Some(release) => Ok(Json(release)),
        None => Err(ApiError::not_found("release not found")),
    }
}

/// Stream a release's primary artifact
pub async fn download_release_handler(
    State(state): State<Arc<AppState>>,
    Path((product, version)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let release = state
        .storage
        .get_release(&product, &version)
        .await?
        .ok_or_else(|| ApiError::not_found("release not found"))?;

    let filename = artifact_filename(&release.artifact_path);
    let file = state
        .artifacts
        .get(&product, &version, &filename)
        .await
        .map_err(|_| ApiError::internal("failed to get artifact"))?;

    let headers = download_headers(&filename, Some(release.artifact_size as u64), &release.checksum)?;
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Direct binary fetch at `/{product}/{version}/{filename}`, the path shape
/// installer scripts expect
pub async fn direct_download_handler(
    State(state): State<Arc<AppState>>,
    Path((product, version, filename)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    // The root-level wildcard also matches API-shaped paths; bounce those.
    if product == "api" || product == "health" {
        return Err(ApiError::not_found("not found"));
    }

    if !state.artifacts.exists(&product, &version, &filename).await {
        return Err(ApiError::not_found("artifact not found"));
    }

    let file = state
        .artifacts
        .get(&product, &version, &filename)
        .await
        .map_err(|_| ApiError::internal("failed to get artifact"))?;
    let size = file.metadata().await.ok().map(|meta| meta.len());

    // Checksum header only when the catalog knows this artifact.
    let checksum = state
        .storage
        .get_release(&product, &version)
        .await?
        .map(|release| release.checksum)
        .unwrap_or_default();

    let headers = download_headers(&filename, size, &checksum)?;
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Delete a release row and its primary artifact
pub async fn delete_release_handler(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path((product, version)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(release) = state.storage.get_release(&product, &version).await? else {
        return Err(ApiError::not_found("release not found"));
    };

    state.storage.delete_release(&release).await?;

    let filename = artifact_filename(&release.artifact_path);
    if let Err(err) = state.artifacts.delete(&product, &version, &filename).await {
        warn!("Failed to delete artifact for {} {}: {}", product, version, err);
    }

    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

fn download_headers(
    filename: &str,
    size: Option<u64>,
    checksum: &str,
) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename={}", filename))
            .map_err(|_| ApiError::internal("invalid artifact filename"))?,
    );
    if let Some(size) = size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
    if !checksum.is_empty() {
        headers.insert(
            "X-Checksum-SHA256",
            HeaderValue::from_str(checksum)
                .map_err(|_| ApiError::internal("invalid checksum"))?,
        );
    }
    Ok(headers)
}
