//! Client for the update server

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use updates_common::{
    ActivationRequest, ActivationResponse, Channel, Error, Heartbeat, HeartbeatResponse,
    ReleaseInfo,
};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the update server API
pub struct ServerClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl ServerClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        ServerClient {
            base_url,
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Activate a license. Policy refusals come back in the body with
    /// `success: false`, so the status code is not treated as an error.
    pub async fn activate(&self, request: &ActivationRequest) -> Result<ActivationResponse> {
        let url = format!("{}/api/v1/license/activate", self.base_url);

        let response = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .await
            .context("failed to reach the update server")?;

        response
            .json()
            .await
            .context("failed to parse activation response")
    }

    /// Latest release of a product on a channel, relative to the version we
    /// run now. `None` when the catalog has nothing for the product.
    pub async fn latest_release(
        &self,
        product: &str,
        channel: Channel,
        current_version: &str,
    ) -> Result<Option<ReleaseInfo>> {
        let url = format!(
            "{}/api/v1/releases/{}/latest?channel={}&current_version={}",
            self.base_url, product, channel, current_version
        );

        debug!("Checking latest release: {}", url);

        let response = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("server returned {}", response.status());
        }

        let info = response
            .json()
            .await
            .context("failed to parse release info")?;
        Ok(Some(info))
    }

    /// Send one heartbeat and return the server's update offers
    pub async fn send_heartbeat(
        &self,
        heartbeat: &Heartbeat,
        timeout: Duration,
    ) -> Result<HeartbeatResponse> {
        let url = format!("{}/api/v1/heartbeat", self.base_url);

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .header("X-API-Key", &self.api_key)
            .json(heartbeat)
            .send()
            .await
            .context("failed to send heartbeat")?;

        if !response.status().is_success() {
            bail!("heartbeat returned {}", response.status());
        }

        response
            .json()
            .await
            .context("failed to parse heartbeat response")
    }

    /// Stream a download to `dest`, verifying its SHA-256 along the way.
    /// On mismatch the temp file is removed and an error returned.
    pub async fn download(
        &self,
        download_url: &str,
        dest: &Path,
        expected_checksum: Option<&str>,
    ) -> Result<()> {
        let url = if download_url.starts_with("http://") || download_url.starts_with("https://") {
            download_url.to_string()
        } else {
            format!("{}{}", self.base_url, download_url)
        };

        debug!("Downloading {} -> {}", url, dest.display());

        let mut response = self
            .http
            .get(&url)
            .timeout(DOWNLOAD_TIMEOUT)
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .context("download request failed")?;

        if !response.status().is_success() {
            bail!("download returned status {}", response.status());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create download directory")?;
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut hasher = Sha256::new();

        while let Some(chunk) = response.chunk().await.context("download stream failed")? {
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .context("failed to write download")?;
        }
        file.flush().await.context("failed to flush download")?;
        drop(file);

        if let Some(expected) = expected_checksum {
            let actual = hex::encode(hasher.finalize());
            if !expected.is_empty() && actual != expected {
                tokio::fs::remove_file(dest).await.ok();
                return Err(Error::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                }
                .into());
            }
        }

        Ok(())
    }
}
