//! Heartbeat payloads sent by agents and the server's response

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::release::{Channel, ReleaseInfo};

/// Periodic status report from one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    pub instance_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updater_version: String,

    /// SHA-256 of the agent's config file, for drift detection
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_hash: String,

    #[serde(default)]
    pub license: LicenseStatus,

    #[serde(default)]
    pub products: Vec<ProductStatus>,

    #[serde(default)]
    pub system: SystemMetrics,

    #[serde(default)]
    pub security: SecurityStatus,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// License state as the agent sees it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseStatus {
    pub key: String,
    pub valid: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Unit state of a managed product as reported in heartbeats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductState {
    Running,
    Stopped,
    Crashed,
    Updating,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Per-product state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductStatus {
    pub name: String,
    pub version: String,
    pub channel: Channel,
    pub status: ProductState,

    /// Seconds since the service last started
    #[serde(default)]
    pub uptime: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restart: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub health_endpoint: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub health_status: String,
}

/// Host resource usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub os: String,
    pub arch: String,
    pub cpu_usage: f64,
    pub memory_total: u64,
    pub memory_used: u64,
    pub disk_total: u64,
    pub disk_used: u64,
    pub load_average: f64,
    pub uptime: u64,
}

/// Host security posture snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityStatus {
    pub firewall_enabled: bool,
    pub ssh_hardened: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls_certificates: Vec<CertStatus>,

    pub pending_updates: u32,
    pub security_updates: u32,
    pub reboot_required: bool,
    pub compliance_score: f64,
    pub security_score: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan: Option<DateTime<Utc>>,
}

/// TLS certificate state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertStatus {
    pub domain: String,
    pub expires_at: DateTime<Utc>,
    pub days_left: i64,

    /// `valid`, `expiring` or `expired`
    pub status: String,
}

/// Server reply to a heartbeat: ack plus any pending update offers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,

    #[serde(default)]
    pub updates: Vec<ReleaseInfo>,
}
