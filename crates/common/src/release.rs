//! Release catalog types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Release stream a product version is published on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Stable,
    Beta,
    Nightly,
    Alpha,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Nightly => "nightly",
            Channel::Alpha => "alpha",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(Channel::Stable),
            "beta" => Ok(Channel::Beta),
            "nightly" => Ok(Channel::Nightly),
            "alpha" => Ok(Channel::Alpha),
            other => Err(Error::UnknownChannel(other.to_string())),
        }
    }
}

/// A published product version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub product_name: String,
    pub version: String,
    pub channel: Channel,
    pub manifest: Manifest,

    /// Path of the primary artifact within the blob store
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub artifact_path: String,
    pub artifact_size: i64,

    /// SHA-256 hex of the primary artifact, computed server-side on upload
    pub checksum: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_notes: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_updater_version: String,

    pub released_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Release metadata shipped alongside the artifact set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub product: String,
    pub version: String,
    pub channel: Channel,
    pub artifacts: Vec<Artifact>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub changelog: String,
}

/// A downloadable file belonging to a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,

    /// Target platform, e.g. `linux/amd64`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,

    pub size: i64,
    pub checksum: String,
}

/// Answer to a "what is the latest release?" query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub product: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version: String,

    pub latest_version: String,
    pub update_available: bool,
    pub channel: Channel,
    pub download_url: String,
    pub checksum: String,
    pub size: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_notes: String,

    pub released_at: DateTime<Utc>,
}

impl ReleaseInfo {
    /// Build the advertisement for `release` as seen by a caller currently
    /// running `current_version`. Any version difference counts as an update;
    /// the catalog's newest-by-release-date entry is authoritative, so a
    /// re-published older version is advertised too.
    pub fn for_release(release: &Release, current_version: &str) -> Self {
        let update_available = current_version.is_empty() || current_version != release.version;

        ReleaseInfo {
            product: release.product_name.clone(),
            current_version: current_version.to_string(),
            latest_version: release.version.clone(),
            update_available,
            channel: release.channel,
            download_url: format!(
                "/api/v1/releases/{}/{}/download",
                release.product_name, release.version
            ),
            checksum: release.checksum.clone(),
            size: release.artifact_size,
            release_notes: release.release_notes.clone(),
            released_at: release.released_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(version: &str) -> Release {
        Release {
            id: "r-1".to_string(),
            product_name: "siemcore-api".to_string(),
            version: version.to_string(),
            channel: Channel::Stable,
            manifest: Manifest::default(),
            artifact_path: String::new(),
            artifact_size: 42,
            checksum: "ab".repeat(32),
            signature: None,
            release_notes: String::new(),
            min_updater_version: String::new(),
            released_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("stable".parse::<Channel>().unwrap(), Channel::Stable);
        assert_eq!("nightly".parse::<Channel>().unwrap(), Channel::Nightly);
        assert!("weekly".parse::<Channel>().is_err());
    }

    #[test]
    fn test_update_available_on_any_difference() {
        let rel = release("v1.5.0");

        // Older, missing and *newer* current versions all get the offer.
        assert!(ReleaseInfo::for_release(&rel, "v1.4.9").update_available);
        assert!(ReleaseInfo::for_release(&rel, "").update_available);
        assert!(ReleaseInfo::for_release(&rel, "v1.6.0").update_available);
        assert!(!ReleaseInfo::for_release(&rel, "v1.5.0").update_available);
    }

    #[test]
    fn test_download_url_shape() {
        let info = ReleaseInfo::for_release(&release("v1.5.0"), "");
        assert_eq!(info.download_url, "/api/v1/releases/siemcore-api/v1.5.0/download");
    }
}
