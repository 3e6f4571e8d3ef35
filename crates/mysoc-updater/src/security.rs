//! Host security posture
//!
//! A slim snapshot for heartbeats: hardening flags from config, pending
//! package update counts, and the reboot-required marker. Actual hardening
//! is handled outside the updater.

use std::path::Path;
use std::process::Command;

use chrono::Utc;

use updates_common::SecurityStatus;

use crate::config::SecurityConfig;

const REBOOT_REQUIRED_MARKER: &str = "/var/run/reboot-required";

/// Snapshot the host's security posture
pub fn collect(config: &SecurityConfig) -> SecurityStatus {
    if !config.enabled {
        return SecurityStatus::default();
    }

    let (pending_updates, security_updates) = pending_updates();
    let reboot_required = Path::new(REBOOT_REQUIRED_MARKER).exists();

    let score = score(config, security_updates, reboot_required);

    SecurityStatus {
        firewall_enabled: config.firewall_enabled,
        ssh_hardened: config.ssh_hardened,
        tls_certificates: vec![],
        pending_updates,
        security_updates,
        reboot_required,
        compliance_score: score as f64,
        security_score: score,
        last_scan: Some(Utc::now()),
    }
}

fn score(config: &SecurityConfig, security_updates: u32, reboot_required: bool) -> i32 {
    let checks = [
        config.firewall_enabled,
        config.ssh_hardened,
        security_updates == 0,
        !reboot_required,
    ];
    let passed = checks.iter().filter(|ok| **ok).count() as i32;
    passed * 100 / checks.len() as i32
}

/// Pending and security-only update counts from a dry-run upgrade
fn pending_updates() -> (u32, u32) {
    let pending = match Command::new("apt-get").args(["-s", "upgrade"]).output() {
        Ok(output) => parse_upgraded_count(&String::from_utf8_lossy(&output.stdout)),
        Err(_) => 0,
    };

    let security = match Command::new("apt-get")
        .args([
            "-s",
            "upgrade",
            "-o",
            "Dir::Etc::sourcelist=/etc/apt/sources.list.d/security.sources",
        ])
        .output()
    {
        Ok(output) => parse_upgraded_count(&String::from_utf8_lossy(&output.stdout)),
        Err(_) => 0,
    };

    (pending, security)
}

/// Extract N from apt's `N upgraded, M newly installed, ...` summary line
fn parse_upgraded_count(output: &str) -> u32 {
    for line in output.lines() {
        if let Some(position) = line.find(" upgraded,") {
            if let Ok(count) = line[..position].trim().parse() {
                return count;
            }
        }
    }
    0
}
