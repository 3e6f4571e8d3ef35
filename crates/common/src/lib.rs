//! Shared types for the update control plane and the on-host updater.
//!
//! Everything that crosses the wire between `update-server` and
//! `mysoc-updater` lives here: licenses, instances, the release catalog
//! types, heartbeat payloads, and the activation handshake.

pub mod deployment;
pub mod error;
pub mod heartbeat;
pub mod instance;
pub mod license;
pub mod manifest;
pub mod release;

pub use deployment::{Deployment, DeploymentStatus};
pub use error::{Error, Result};
pub use heartbeat::{
    CertStatus, Heartbeat, HeartbeatResponse, LicenseStatus, ProductState, ProductStatus,
    SecurityStatus, SystemMetrics,
};
pub use instance::{Instance, InstanceStatus};
pub use license::{ActivationRequest, ActivationResponse, InstanceInfo, License, LicenseLimits};
pub use manifest::{InstallManifest, ProductInstall};
pub use release::{Artifact, Channel, Manifest, Release, ReleaseInfo};
