//! Registered instances

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::heartbeat::Heartbeat;

/// Liveness state of an instance as seen by the control plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Online,
    Offline,
    Degraded,
    #[default]
    Unknown,
}

/// One managed host running the updater agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,

    /// Stable human-readable identifier, e.g. `siemcore-acme-corp-local`.
    /// Immutable after creation.
    pub instance_id: String,

    pub instance_type: String,
    pub hostname: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,

    /// SHA-256 hex of the instance API key. Persisted, but cleared before
    /// any API response leaves the server (empty values are not serialized).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_data: Option<Heartbeat>,

    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Copy with the credential hash stripped, for API responses.
    pub fn redacted(mut self) -> Self {
        self.api_key_hash.clear();
        self
    }
}
