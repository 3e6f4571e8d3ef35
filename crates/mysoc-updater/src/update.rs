//! Update checking and application
//!
//! Per product: ask the server for the latest release on our channel,
//! download it to a temp path with checksum verification, back up the
//! current binary, stop the service, swap binaries with a rename, restart,
//! and roll back to the backup if the new binary fails to start. The
//! version file is committed last.

use std::cmp::Ordering;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Timelike;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use updates_common::{Deployment, DeploymentStatus, ReleaseInfo};

use crate::client::ServerClient;
use crate::config::{AgentConfig, MaintenanceWindow, ProductConfig};
use crate::paths::Layout;
use crate::service_control::ServiceController;

const STARTUP_DELAY: Duration = Duration::from_secs(10);

/// Downloads and applies product updates
pub struct Updater {
    config: AgentConfig,
    layout: Layout,
    client: ServerClient,
    controller: Arc<dyn ServiceController>,
}

impl Updater {
    pub fn new(config: AgentConfig, controller: Arc<dyn ServiceController>) -> Self {
        let layout = Layout::for_instance_type(&config.instance.instance_type);
        Updater::with_layout(config, layout, controller)
    }

    pub fn with_layout(
        config: AgentConfig,
        layout: Layout,
        controller: Arc<dyn ServiceController>,
    ) -> Self {
        let client = ServerClient::new(&config.server.url, &config.server.api_key);
        Updater { config, layout, client, controller }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Periodic check loop. Ticks are gated by the maintenance window; the
    /// first check runs shortly after startup regardless.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(STARTUP_DELAY) => {}
        }
        self.check_all().await;

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.update.check_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Update checker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if in_maintenance_window(self.config.update.maintenance_window.as_ref()) {
                        self.check_all().await;
                    }
                }
            }
        }
    }

    /// Check every configured product and apply pending updates
    pub async fn check_all(&self) {
        for product in &self.config.products {
            match self.check(&product.name).await {
                Ok(Some(info)) if info.update_available => {
                    if !self.config.update.auto_update {
                        info!(
                            "Update available for {} ({} -> {}), auto-update disabled",
                            product.name, info.current_version, info.latest_version
                        );
                        continue;
                    }

                    info!(
                        "Update available for {}: {} -> {}",
                        product.name, info.current_version, info.latest_version
                    );
                    match self.apply(product, &info).await {
                        Ok(()) => info!("Updated {} to {}", product.name, info.latest_version),
                        Err(err) => error!("Error applying update for {}: {:#}", product.name, err),
                    }
                }
                Ok(_) => {}
                Err(err) => error!("Error checking update for {}: {:#}", product.name, err),
            }
        }
    }

    /// Ask the server for the latest release of a product on our channel
    pub async fn check(&self, product: &str) -> Result<Option<ReleaseInfo>> {
        let current = self.layout.current_version(product).unwrap_or_default();
        self.client
            .latest_release(product, self.config.update.channel, &current)
            .await
    }

    /// Download and install one update
    pub async fn apply(&self, product: &ProductConfig, info: &ReleaseInfo) -> Result<()> {
        let staged = self.layout.temp_download(&product.name, &info.latest_version);

        if let Err(err) = self
            .client
            .download(&info.download_url, &staged, Some(&info.checksum))
            .await
        {
            let mut deployment = Deployment::new(
                Uuid::new_v4().to_string(),
                self.config.instance.id.clone(),
                product.name.clone(),
                info.latest_version.clone(),
                self.layout.current_version(&product.name).unwrap_or_default(),
            );
            deployment.mark_failed(format!("failed to download update: {}", err));
            self.record(&deployment);
            return Err(err.context("failed to download update"));
        }

        self.install_staged(product, info, &staged).await
    }

    /// Install an already-downloaded binary: backup, stop, swap, start,
    /// commit. On a failed start the previous binary is restored and
    /// restarted within this call.
    pub async fn install_staged(
        &self,
        product: &ProductConfig,
        info: &ReleaseInfo,
        staged: &Path,
    ) -> Result<()> {
        let current_version = self.layout.current_version(&product.name);
        let mut deployment = Deployment::new(
            Uuid::new_v4().to_string(),
            self.config.instance.id.clone(),
            product.name.clone(),
            info.latest_version.clone(),
            current_version.clone().unwrap_or_default(),
        );
        deployment.status = DeploymentStatus::Installing;
        self.record(&deployment);

        // Backup the running binary. A missing binary is a first install.
        let backup = current_version
            .as_deref()
            .map(|version| self.layout.backup_file(&product.name, version));
        if let Some(ref backup) = backup {
            if product.binary.exists() {
                if let Err(err) = std::fs::copy(&product.binary, backup) {
                    warn!("Failed to back up current {}: {}", product.name, err);
                }
            }
        }

        // The service may already be down; a failed stop is not fatal.
        if let Err(err) = self.controller.stop(&product.service) {
            warn!("Failed to stop {}: {}", product.service, err);
        }

        // Atomic swap: the target is either the old binary or the new one,
        // never a partial write.
        if let Err(err) = std::fs::rename(staged, &product.binary) {
            restore_backup(backup.as_deref(), &product.binary);
            deployment.mark_failed(format!("failed to install new version: {}", err));
            self.record(&deployment);
            bail!("failed to install new version: {}", err);
        }

        set_executable(&product.binary)?;

        if let Err(err) = self.controller.start(&product.service) {
            // Roll back: old binary, old service.
            restore_backup(backup.as_deref(), &product.binary);
            if let Err(restart_err) = self.controller.start(&product.service) {
                error!(
                    "Failed to restart {} after rollback: {}",
                    product.service, restart_err
                );
            }
            deployment.mark_rolled_back(format!("service failed to start: {}", err));
            self.record(&deployment);
            bail!("failed to start service after update, rolled back: {}", err);
        }

        self.layout
            .write_version(&product.name, &info.latest_version)?;

        deployment.mark_success();
        self.record(&deployment);
        Ok(())
    }

    /// Restore a product to its newest backed-up version. Returns the
    /// version rolled back to.
    pub async fn rollback(&self, product: &ProductConfig) -> Result<String> {
        let Some((backup_path, version)) =
            find_latest_backup(&self.layout.backups_dir(), &product.name)
        else {
            bail!("no backup found for {}", product.name);
        };

        info!("Rolling back {} to {}", product.name, version);

        if let Err(err) = self.controller.stop(&product.service) {
            warn!("Failed to stop {}: {}", product.service, err);
        }

        // Keep a safety copy of what we are replacing.
        if let Some(current) = self.layout.current_version(&product.name) {
            if product.binary.exists() {
                let keep = self.layout.current_backup_file(&product.name, &current);
                if let Err(err) = std::fs::copy(&product.binary, &keep) {
                    warn!("Failed to back up current binary: {}", err);
                }
            }
        }

        std::fs::copy(&backup_path, &product.binary).context("failed to restore backup")?;
        set_executable(&product.binary)?;

        if let Err(err) = self.layout.write_version(&product.name, &version) {
            warn!("Failed to update version file: {}", err);
        }

        self.controller
            .start(&product.service)
            .context("failed to start service after rollback")?;

        Ok(version)
    }

    /// Append a deployment record to the local history. History is advisory;
    /// failures only log.
    fn record(&self, deployment: &Deployment) {
        let line = match serde_json::to_string(deployment) {
            Ok(line) => line,
            Err(err) => {
                warn!("Failed to serialize deployment record: {}", err);
                return;
            }
        };

        let path = self.layout.deployments_log();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "{}", line));

        if let Err(err) = result {
            warn!("Failed to append deployment record: {}", err);
        }
    }
}

fn restore_backup(backup: Option<&Path>, target: &Path) {
    let Some(backup) = backup else { return };
    if !backup.exists() {
        return;
    }
    if let Err(err) = std::fs::copy(backup, target) {
        error!("Failed to restore backup {}: {}", backup.display(), err);
    }
}

fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

/// Whether updates may run now. No window means always.
pub fn in_maintenance_window(window: Option<&MaintenanceWindow>) -> bool {
    let Some(window) = window else { return true };
    let now = chrono::Local::now();
    window_contains(window, now.hour() * 60 + now.minute())
}

/// Window check against minutes-since-midnight. `start > end` wraps past
/// midnight. Unparseable bounds fail open.
pub fn window_contains(window: &MaintenanceWindow, minutes: u32) -> bool {
    let (Some(start), Some(end)) = (parse_hhmm(&window.start), parse_hhmm(&window.end)) else {
        return true;
    };

    if start < end {
        minutes >= start && minutes <= end
    } else {
        minutes >= start || minutes <= end
    }
}

fn parse_hhmm(value: &str) -> Option<u32> {
    let (hours, mins) = value.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let mins: u32 = mins.parse().ok()?;
    if hours > 23 || mins > 59 {
        return None;
    }
    Some(hours * 60 + mins)
}

/// Order two version strings, comparing dot/dash segments numerically when
/// both sides are numeric. Fixes the lexicographic trap where
/// `v1.10.0 < v1.2.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let segments = |s: &str| -> Vec<String> {
        s.trim_start_matches('v')
            .split(['.', '-'])
            .map(str::to_string)
            .collect()
    };

    let left = segments(a);
    let right = segments(b);

    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    left.len().cmp(&right.len())
}

/// Newest backup for a product, by version order. Pre-rollback safety
/// copies (`*.current.bak`) are not candidates.
pub fn find_latest_backup(backups_dir: &Path, product: &str) -> Option<(PathBuf, String)> {
    let entries = std::fs::read_dir(backups_dir).ok()?;
    let prefix = format!("{}.", product);
    let mut best: Option<(PathBuf, String)> = None;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(&prefix) || !name.ends_with(".bak") || name.ends_with(".current.bak") {
            continue;
        }

        let version = name[prefix.len()..name.len() - ".bak".len()].to_string();
        if version.is_empty() {
            continue;
        }

        let better = match &best {
            Some((_, current)) => compare_versions(&version, current) == Ordering::Greater,
            None => true,
        };
        if better {
            best = Some((entry.path(), version));
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Mutex;

    use chrono::Utc;
    use updates_common::Channel;

    use crate::service_control::UnitState;

    /// Scripted controller: fails the first `fail_starts` start calls.
    struct StubController {
        fail_starts: AtomicU32,
        starts: AtomicU32,
        stops: AtomicU32,
        state: Mutex<UnitState>,
    }

    impl StubController {
        fn new(fail_starts: u32) -> Self {
            StubController {
                fail_starts: AtomicU32::new(fail_starts),
                starts: AtomicU32::new(0),
                stops: AtomicU32::new(0),
                state: Mutex::new(UnitState::Active),
            }
        }
    }

    impl ServiceController for StubController {
        fn start(&self, _service: &str) -> Result<()> {
            self.starts.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail_starts.load(AtomicOrdering::SeqCst) > 0 {
                self.fail_starts.fetch_sub(1, AtomicOrdering::SeqCst);
                *self.state.lock().unwrap() = UnitState::Failed;
                anyhow::bail!("unit failed to start");
            }
            *self.state.lock().unwrap() = UnitState::Active;
            Ok(())
        }

        fn stop(&self, _service: &str) -> Result<()> {
            self.stops.fetch_add(1, AtomicOrdering::SeqCst);
            *self.state.lock().unwrap() = UnitState::Inactive;
            Ok(())
        }

        fn status(&self, _service: &str) -> UnitState {
            *self.state.lock().unwrap()
        }

        fn pid(&self, _service: &str) -> Option<u32> {
            None
        }

        fn reload(&self, _service: &str) -> Result<()> {
            Ok(())
        }
    }

    fn release_info(product: &str, version: &str, current: &str) -> ReleaseInfo {
        ReleaseInfo {
            product: product.to_string(),
            current_version: current.to_string(),
            latest_version: version.to_string(),
            update_available: true,
            channel: Channel::Stable,
            download_url: format!("/api/v1/releases/{}/{}/download", product, version),
            checksum: String::new(),
            size: 0,
            release_notes: String::new(),
            released_at: Utc::now(),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        layout: Layout,
        product: ProductConfig,
        controller: Arc<StubController>,
        updater: Updater,
    }

    fn harness(fail_starts: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure().unwrap();

        let product = ProductConfig {
            name: "siemcore-api".to_string(),
            service: "siemcore-api.service".to_string(),
            binary: layout.binary("siemcore-api"),
            config: layout.product_config("siemcore-api"),
            health_endpoint: String::new(),
        };

        let mut config = AgentConfig::default();
        config.instance.id = "siemcore-test".to_string();
        config.instance.instance_type = "siemcore".to_string();
        config.products = vec![product.clone()];

        let controller = Arc::new(StubController::new(fail_starts));
        let updater = Updater::with_layout(config, layout.clone(), controller.clone());

        Harness { _dir: dir, layout, product, controller, updater }
    }

    fn stage(harness: &Harness, version: &str, contents: &[u8]) -> PathBuf {
        let staged = harness.layout.temp_download(&harness.product.name, version);
        std::fs::write(&staged, contents).unwrap();
        staged
    }

    #[tokio::test]
    async fn test_install_swaps_binary_and_commits_version() {
        let h = harness(0);
        std::fs::write(&h.product.binary, b"old v1 binary").unwrap();
        h.layout.write_version("siemcore-api", "v1").unwrap();

        let staged = stage(&h, "v2", b"new v2 binary");
        let info = release_info("siemcore-api", "v2", "v1");

        h.updater.install_staged(&h.product, &info, &staged).await.unwrap();

        assert_eq!(std::fs::read(&h.product.binary).unwrap(), b"new v2 binary");
        assert_eq!(h.layout.current_version("siemcore-api").as_deref(), Some("v2"));
        assert!(h.layout.backup_file("siemcore-api", "v1").exists());
        assert_eq!(
            std::fs::read(h.layout.backup_file("siemcore-api", "v1")).unwrap(),
            b"old v1 binary"
        );
        assert!(!staged.exists());
        assert_eq!(h.controller.stops.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(h.controller.starts.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_install_has_no_backup() {
        let h = harness(0);
        let staged = stage(&h, "v1", b"first binary");
        let info = release_info("siemcore-api", "v1", "");

        h.updater.install_staged(&h.product, &info, &staged).await.unwrap();

        assert_eq!(std::fs::read(&h.product.binary).unwrap(), b"first binary");
        assert_eq!(h.layout.current_version("siemcore-api").as_deref(), Some("v1"));
        assert!(std::fs::read_dir(h.layout.backups_dir()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back() {
        // Start fails once for the new binary, then succeeds for the restore.
        let h = harness(1);
        std::fs::write(&h.product.binary, b"old v1 binary").unwrap();
        h.layout.write_version("siemcore-api", "v1").unwrap();

        let staged = stage(&h, "v2", b"broken v2 binary");
        let info = release_info("siemcore-api", "v2", "v1");

        let err = h
            .updater
            .install_staged(&h.product, &info, &staged)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rolled back"));

        // The old binary is back, the version file never moved, and the
        // service is running again.
        assert_eq!(std::fs::read(&h.product.binary).unwrap(), b"old v1 binary");
        assert_eq!(h.layout.current_version("siemcore-api").as_deref(), Some("v1"));
        assert!(h.layout.backup_file("siemcore-api", "v1").exists());
        assert_eq!(h.controller.status("siemcore-api.service"), UnitState::Active);
        assert_eq!(h.controller.starts.load(AtomicOrdering::SeqCst), 2);

        let log = std::fs::read_to_string(h.layout.deployments_log()).unwrap();
        assert!(log.contains("rolled_back"));
    }

    #[tokio::test]
    async fn test_rollback_picks_highest_version_numerically() {
        let h = harness(0);
        std::fs::write(&h.product.binary, b"v2.0.0 binary").unwrap();
        h.layout.write_version("siemcore-api", "v2.0.0").unwrap();

        std::fs::write(h.layout.backup_file("siemcore-api", "v1.2.0"), b"v1.2.0 binary").unwrap();
        std::fs::write(h.layout.backup_file("siemcore-api", "v1.10.0"), b"v1.10.0 binary").unwrap();

        let version = h.updater.rollback(&h.product).await.unwrap();

        // Numeric-aware: v1.10.0 beats v1.2.0 despite lexicographic order.
        assert_eq!(version, "v1.10.0");
        assert_eq!(std::fs::read(&h.product.binary).unwrap(), b"v1.10.0 binary");
        assert_eq!(h.layout.current_version("siemcore-api").as_deref(), Some("v1.10.0"));
        assert!(h.layout.current_backup_file("siemcore-api", "v2.0.0").exists());
        assert_eq!(h.controller.status("siemcore-api.service"), UnitState::Active);
    }

    #[tokio::test]
    async fn test_rollback_without_backup_fails() {
        let h = harness(0);
        let err = h.updater.rollback(&h.product).await.unwrap_err();
        assert!(err.to_string().contains("no backup found"));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("v1.10.0", "v1.2.0"), Ordering::Greater);
        assert_eq!(compare_versions("v1.2.0", "v1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("v1.2", "v1.2.1"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "v1.99.99"), Ordering::Greater);
    }

    #[test]
    fn test_window_contains() {
        let daytime = MaintenanceWindow { start: "02:00".to_string(), end: "05:00".to_string() };
        assert!(window_contains(&daytime, 3 * 60));
        assert!(!window_contains(&daytime, 12 * 60));
        assert!(window_contains(&daytime, 2 * 60));
        assert!(window_contains(&daytime, 5 * 60));

        // Crossing midnight: 23:00 - 03:00.
        let overnight = MaintenanceWindow { start: "23:00".to_string(), end: "03:00".to_string() };
        assert!(window_contains(&overnight, 23 * 60 + 30));
        assert!(window_contains(&overnight, 60));
        assert!(!window_contains(&overnight, 12 * 60));

        // Garbage bounds fail open.
        let broken = MaintenanceWindow { start: "soon".to_string(), end: "later".to_string() };
        assert!(window_contains(&broken, 0));
    }

    #[test]
    fn test_no_window_means_always() {
        assert!(in_maintenance_window(None));
    }

    #[test]
    fn test_find_latest_backup_skips_safety_copies() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure().unwrap();

        std::fs::write(layout.backup_file("siemcore-api", "v1.2.0"), b"a").unwrap();
        std::fs::write(layout.backup_file("siemcore-api", "v1.10.0"), b"b").unwrap();
        std::fs::write(layout.current_backup_file("siemcore-api", "v9.9.9"), b"c").unwrap();
        std::fs::write(layout.backup_file("siemcore-collector", "v5.0.0"), b"d").unwrap();

        let (path, version) = find_latest_backup(&layout.backups_dir(), "siemcore-api").unwrap();
        assert_eq!(version, "v1.10.0");
        assert!(path.ends_with("siemcore-api.v1.10.0.bak"));

        assert!(find_latest_backup(&layout.backups_dir(), "detection-rules").is_none());
    }
}
