//! Install manifests handed out at activation time

use serde::{Deserialize, Serialize};

use crate::release::Channel;

/// What a freshly activated instance should install
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallManifest {
    pub products: Vec<ProductInstall>,
    pub config_template: String,
    pub security_baseline: String,
}

/// One product to install
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInstall {
    pub name: String,

    /// `latest` or a pinned version
    pub version: String,

    pub channel: Channel,
}

impl ProductInstall {
    pub fn latest(name: impl Into<String>) -> Self {
        ProductInstall {
            name: name.into(),
            version: "latest".to_string(),
            channel: Channel::Stable,
        }
    }
}
