//! Service supervision
//!
//! Watches managed services and restarts the ones that crashed or fail
//! their health probe. A restart governor caps attempts per service and
//! enforces a cooldown between them; a healthy tick resets the counter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AgentConfig, ProductConfig};
use crate::service_control::{ServiceController, UnitState};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RESTARTS: u32 = 5;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Clone)]
struct RestartState {
    count: u32,
    last_attempt: Option<Instant>,
    last_restart_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of one supervised service
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub name: String,
    pub state: UnitState,
    pub healthy: bool,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Utc>>,
}

/// Watches and restarts managed services
pub struct Monitor {
    config: AgentConfig,
    controller: Arc<dyn ServiceController>,
    http: reqwest::Client,
    states: Mutex<HashMap<String, RestartState>>,
    max_restarts: u32,
    cooldown: Duration,
}

impl Monitor {
    pub fn new(config: AgentConfig, controller: Arc<dyn ServiceController>) -> Self {
        Monitor {
            config,
            controller,
            http: reqwest::Client::new(),
            states: Mutex::new(HashMap::new()),
            max_restarts: DEFAULT_MAX_RESTARTS,
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    /// Override the governor, for tests that cannot wait out a cooldown
    #[cfg(test)]
    fn with_governor(mut self, max_restarts: u32, cooldown: Duration) -> Self {
        self.max_restarts = max_restarts;
        self.cooldown = cooldown;
        self
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Service monitor stopped");
                    return;
                }
                _ = ticker.tick() => self.check_all_services().await,
            }
        }
    }

    /// One supervision pass over every managed service
    pub async fn check_all_services(&self) {
        for product in &self.config.products {
            match self.controller.status(&product.service) {
                UnitState::Active => {
                    if !product.health_endpoint.is_empty()
                        && !self.probe_health(&product.health_endpoint).await
                    {
                        warn!("Service {} is running but unhealthy", product.service);
                        self.restart_service(product).await;
                        continue;
                    }

                    // Healthy: forgive past crashes.
                    let mut states = self.states.lock().await;
                    if let Some(state) = states.get_mut(&product.service) {
                        state.count = 0;
                    }
                }
                UnitState::Inactive | UnitState::Failed => {
                    warn!("Service {} is down, attempting restart", product.service);
                    self.restart_service(product).await;
                }
                UnitState::Unknown => {}
            }
        }
    }

    async fn probe_health(&self, endpoint: &str) -> bool {
        match self.http.get(endpoint).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn restart_service(&self, product: &ProductConfig) {
        let mut states = self.states.lock().await;
        let state = states.entry(product.service.clone()).or_default();

        if let Some(last) = state.last_attempt {
            if last.elapsed() < self.cooldown {
                info!("Skipping restart of {} (cooldown)", product.service);
                return;
            }
        }

        if state.count >= self.max_restarts {
            warn!(
                "Service {} restarted {} times, giving up",
                product.service, state.count
            );
            return;
        }

        state.count += 1;
        state.last_attempt = Some(Instant::now());
        state.last_restart_at = Some(Utc::now());
        let attempt = state.count;
        drop(states);

        if let Err(err) = self.controller.stop(&product.service) {
            warn!("Failed to stop {}: {}", product.service, err);
        }
        match self.controller.start(&product.service) {
            Ok(()) => info!("Restarted service {} (attempt {})", product.service, attempt),
            Err(err) => warn!("Failed to restart {}: {}", product.service, err),
        }
    }

    /// Status of all managed services, for the CLI
    pub async fn statuses(&self) -> Vec<ServiceStatus> {
        let states = self.states.lock().await;
        let mut result = Vec::new();

        for product in &self.config.products {
            let state = states.get(&product.service).cloned().unwrap_or_default();
            let unit_state = self.controller.status(&product.service);
            let healthy = if product.health_endpoint.is_empty() {
                unit_state == UnitState::Active
            } else {
                self.probe_health(&product.health_endpoint).await
            };

            result.push(ServiceStatus {
                name: product.service.clone(),
                state: unit_state,
                healthy,
                restart_count: state.count,
                last_restart: state.last_restart_at,
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Controller whose service never comes back up
    struct CrashingController {
        starts: AtomicU32,
    }

    impl ServiceController for CrashingController {
        fn start(&self, _service: &str) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("crashed again")
        }

        fn stop(&self, _service: &str) -> Result<()> {
            Ok(())
        }

        fn status(&self, _service: &str) -> UnitState {
            UnitState::Failed
        }

        fn pid(&self, _service: &str) -> Option<u32> {
            None
        }

        fn reload(&self, _service: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Controller that flaps: down until restarted, then healthy
    struct RecoveringController {
        state: StdMutex<UnitState>,
    }

    impl ServiceController for RecoveringController {
        fn start(&self, _service: &str) -> Result<()> {
            *self.state.lock().unwrap() = UnitState::Active;
            Ok(())
        }

        fn stop(&self, _service: &str) -> Result<()> {
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

    fn config_with_service() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.products = vec![ProductConfig {
            name: "siemcore-api".to_string(),
            service: "siemcore-api.service".to_string(),
            binary: "/tmp/siemcore-api".into(),
            config: "/tmp/siemcore-api.yaml".into(),
            health_endpoint: String::new(),
        }];
        config
    }

    #[tokio::test]
    async fn test_restart_governor_caps_attempts() {
        let controller = Arc::new(CrashingController { starts: AtomicU32::new(0) });
        let monitor = Monitor::new(config_with_service(), controller.clone())
            .with_governor(5, Duration::ZERO);

        // A perpetually crashing service gets at most five restarts.
        for _ in 0..20 {
            monitor.check_all_services().await;
        }

        assert_eq!(controller.starts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_immediate_retry() {
        let controller = Arc::new(CrashingController { starts: AtomicU32::new(0) });
        let monitor = Monitor::new(config_with_service(), controller.clone())
            .with_governor(5, Duration::from_secs(3600));

        monitor.check_all_services().await;
        monitor.check_all_services().await;
        monitor.check_all_services().await;

        // Only the first attempt ran; the rest hit the cooldown.
        assert_eq!(controller.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_healthy_tick_resets_counter() {
        let controller = Arc::new(RecoveringController {
            state: StdMutex::new(UnitState::Failed),
        });
        let monitor = Monitor::new(config_with_service(), controller.clone())
            .with_governor(5, Duration::ZERO);

        // Down -> restarted, next tick sees it healthy and forgives.
        monitor.check_all_services().await;
        monitor.check_all_services().await;

        let statuses = monitor.statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, UnitState::Active);
        assert_eq!(statuses[0].restart_count, 0);
    }
}
