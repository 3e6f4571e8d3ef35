//! On-host update agent
//!
//! Bootstraps a managed instance from a license key, keeps its products up
//! to date inside the maintenance window, supervises their services, and
//! reports status back to the control plane.

pub mod client;
pub mod commands;
pub mod config;
pub mod heartbeat;
pub mod metrics;
pub mod monitor;
pub mod paths;
pub mod security;
pub mod service_control;
pub mod update;

pub use client::ServerClient;
pub use config::AgentConfig;
pub use paths::Layout;
pub use service_control::{ServiceController, SystemdController, UnitState};
