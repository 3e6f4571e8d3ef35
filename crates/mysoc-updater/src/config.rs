//! Agent configuration
//!
//! YAML file at `<base>/updater/config.yaml`, written once by `init` and
//! read by every other command. Unknown instances reconfigure by re-running
//! `init`; there is no live reload.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use updates_common::Channel;

/// Full agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub instance: InstanceConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub products: Vec<ProductConfig>,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Update server connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,

    #[serde(default)]
    pub api_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            url: "https://updates.mysoc.ai".to_string(),
            api_key: String::new(),
        }
    }
}

/// Identity of this instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default)]
    pub id: String,

    /// `mysoc-cloud`, `siemcore` or `siemcore-lite`
    #[serde(default, rename = "type")]
    pub instance_type: String,

    #[serde(default)]
    pub license_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            interval_secs: default_heartbeat_interval(),
            timeout_secs: default_heartbeat_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default)]
    pub channel: Channel,

    #[serde(default = "default_true")]
    pub auto_update: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_window: Option<MaintenanceWindow>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        UpdateConfig {
            check_interval_secs: default_check_interval(),
            channel: Channel::Stable,
            auto_update: true,
            maintenance_window: None,
        }
    }
}

/// Wall-clock window during which updates may be applied. A window whose
/// start is after its end wraps past midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    /// `HH:MM`
    pub start: String,

    /// `HH:MM`
    pub end: String,
}

/// One product managed on this host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductConfig {
    pub name: String,

    /// systemd unit name
    pub service: String,

    /// Installed binary path
    pub binary: PathBuf,

    /// Product config file path
    #[serde(default)]
    pub config: PathBuf,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub health_endpoint: String,
}

/// Security posture flags reported in heartbeats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub firewall_enabled: bool,

    #[serde(default = "default_true")]
    pub ssh_hardened: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            enabled: true,
            firewall_enabled: true,
            ssh_hardened: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level() }
    }
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_heartbeat_timeout() -> u64 {
    10
}

fn default_check_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AgentConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        serde_yaml::from_str(&data).context("failed to parse config file")
    }

    /// Save configuration, readable only by the owner (it carries the
    /// instance API key)
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self).context("failed to serialize config")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .context("failed to set config permissions")?;
        }

        Ok(())
    }

    /// Resolve the config path: an explicit `--config`, then the known
    /// install locations.
    pub fn find(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        [
            "/opt/siemcore/updater/config.yaml",
            "/opt/mysoc/updater/config.yaml",
            "./config.yaml",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
    }

    pub fn product(&self, name: &str) -> Option<&ProductConfig> {
        self.products.iter().find(|p| p.name == name)
    }
}
