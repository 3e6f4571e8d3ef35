//! Deployment attempt history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phases of one deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Downloading,
    Installing,
    Success,
    Failed,
    RolledBack,
}

/// One recorded attempt to move an instance's product to a new version.
/// Records are append-only; a finished attempt is never edited again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub instance_id: String,
    pub product: String,
    pub version: String,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub previous_version: String,
}

impl Deployment {
    pub fn new(
        id: String,
        instance_id: String,
        product: String,
        version: String,
        previous_version: String,
    ) -> Self {
        Deployment {
            id,
            instance_id,
            product,
            version,
            status: DeploymentStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            error_message: String::new(),
            previous_version,
        }
    }

    pub fn mark_success(&mut self) {
        self.status = DeploymentStatus::Success;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = DeploymentStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = error.into();
    }

    pub fn mark_rolled_back(&mut self, error: impl Into<String>) {
        self.status = DeploymentStatus::RolledBack;
        self.completed_at = Some(Utc::now());
        self.error_message = error.into();
    }
}
