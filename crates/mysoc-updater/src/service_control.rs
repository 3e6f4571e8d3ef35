//! Host service control
//!
//! The updater drives product services through the `ServiceController`
//! trait; production hosts get the systemd implementation, tests drive the
//! update and supervision paths with scripted stubs.

use std::fmt;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

/// Unit state as reported by the host init system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Active,
    Inactive,
    Failed,
    Unknown,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Active => "active",
            UnitState::Inactive => "inactive",
            UnitState::Failed => "failed",
            UnitState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Abstraction over the host init/supervisor
pub trait ServiceController: Send + Sync {
    fn start(&self, service: &str) -> Result<()>;
    fn stop(&self, service: &str) -> Result<()>;
    fn status(&self, service: &str) -> UnitState;
    fn pid(&self, service: &str) -> Option<u32>;
    fn reload(&self, service: &str) -> Result<()>;
}

/// systemd-backed controller
#[derive(Debug, Clone, Default)]
pub struct SystemdController;

impl SystemdController {
    fn systemctl(&self, args: &[&str]) -> Result<()> {
        debug!("systemctl {}", args.join(" "));
        let status = Command::new("systemctl")
            .args(args)
            .status()
            .context("failed to run systemctl")?;

        if !status.success() {
            anyhow::bail!("systemctl {} exited with {}", args.join(" "), status);
        }
        Ok(())
    }

    /// Pick up freshly written unit files
    pub fn daemon_reload(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"])
    }

    pub fn enable(&self, service: &str) -> Result<()> {
        self.systemctl(&["enable", service])
    }
}

impl ServiceController for SystemdController {
    fn start(&self, service: &str) -> Result<()> {
        self.systemctl(&["start", service])
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.systemctl(&["stop", service])
    }

    fn status(&self, service: &str) -> UnitState {
        let output = match Command::new("systemctl").args(["is-active", service]).output() {
            Ok(output) => output,
            Err(_) => return UnitState::Unknown,
        };

        match String::from_utf8_lossy(&output.stdout).trim() {
            "active" => UnitState::Active,
            "inactive" => UnitState::Inactive,
            "failed" => UnitState::Failed,
            _ => UnitState::Unknown,
        }
    }

    fn pid(&self, service: &str) -> Option<u32> {
        let output = Command::new("systemctl")
            .args(["show", service, "--property=MainPID", "--value"])
            .output()
            .ok()?;

        let pid: u32 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
        if pid == 0 {
            None
        } else {
            Some(pid)
        }
    }

    fn reload(&self, service: &str) -> Result<()> {
        self.systemctl(&["reload", service])
    }
}
