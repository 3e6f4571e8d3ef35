//! Heartbeat reporting
//!
//! Collects product, system and security state and posts it to the update
//! server on an interval. Transport failures are logged and dropped; the
//! next tick retries with a fresh snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use updates_common::{Heartbeat, LicenseStatus, ProductState, ProductStatus};

use crate::client::ServerClient;
use crate::config::AgentConfig;
use crate::metrics;
use crate::paths::Layout;
use crate::security;
use crate::service_control::{ServiceController, UnitState};

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts periodic heartbeats to the update server
pub struct Reporter {
    config: AgentConfig,
    layout: Layout,
    client: ServerClient,
    controller: Arc<dyn ServiceController>,
    http: reqwest::Client,
}

impl Reporter {
    pub fn new(config: AgentConfig, controller: Arc<dyn ServiceController>) -> Self {
        let layout = Layout::for_instance_type(&config.instance.instance_type);
        Reporter::with_layout(config, layout, controller)
    }

    pub fn with_layout(
        config: AgentConfig,
        layout: Layout,
        controller: Arc<dyn ServiceController>,
    ) -> Self {
        let client = ServerClient::new(&config.server.url, &config.server.api_key);
        Reporter { config, layout, client, controller, http: reqwest::Client::new() }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // First tick completes immediately: the initial heartbeat goes out
        // right away.
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Heartbeat reporter stopped");
                    return;
                }
                _ = ticker.tick() => self.send().await,
            }
        }
    }

    /// Send one heartbeat; failures only log
    pub async fn send(&self) {
        let heartbeat = self.collect().await;
        let timeout = Duration::from_secs(self.config.heartbeat.timeout_secs);

        match self.client.send_heartbeat(&heartbeat, timeout).await {
            Ok(response) => {
                if !response.updates.is_empty() {
                    debug!(
                        "Server advertised {} pending update(s)",
                        response.updates.len()
                    );
                }
            }
            Err(err) => warn!("Failed to send heartbeat: {:#}", err),
        }
    }

    /// Assemble the full heartbeat snapshot
    pub async fn collect(&self) -> Heartbeat {
        Heartbeat {
            instance_id: self.config.instance.id.clone(),
            instance_type: self.config.instance.instance_type.clone(),
            hostname: metrics::hostname(),
            updater_version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.config_hash(),
            license: LicenseStatus {
                key: self.config.instance.license_key.clone(),
                valid: true, // the server re-validates on its side
                expires_at: None,
                last_check: Some(Utc::now()),
            },
            products: self.product_statuses().await,
            system: metrics::collect(),
            security: security::collect(&self.config.security),
            timestamp: Some(Utc::now()),
        }
    }

    /// SHA-256 of the config file, so the server can spot drift
    fn config_hash(&self) -> String {
        match std::fs::read(self.layout.config_file()) {
            Ok(data) => hex::encode(Sha256::digest(&data)),
            Err(_) => String::new(),
        }
    }

    async fn product_statuses(&self) -> Vec<ProductStatus> {
        let mut statuses = Vec::new();

        for product in &self.config.products {
            let unit_state = self.controller.status(&product.service);
            let status = match unit_state {
                UnitState::Active => ProductState::Running,
                UnitState::Inactive => ProductState::Stopped,
                UnitState::Failed => ProductState::Crashed,
                UnitState::Unknown => ProductState::Unknown,
            };

            let pid = if status == ProductState::Running {
                self.controller.pid(&product.service)
            } else {
                None
            };

            let health_status = if product.health_endpoint.is_empty() {
                String::new()
            } else if self.probe_health(&product.health_endpoint).await {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            };

            statuses.push(ProductStatus {
                name: product.name.clone(),
                version: self
                    .layout
                    .current_version(&product.name)
                    .unwrap_or_else(|| "unknown".to_string()),
                channel: self.config.update.channel,
                status,
                uptime: 0,
                last_restart: None,
                pid,
                health_endpoint: product.health_endpoint.clone(),
                health_status,
            });
        }

        statuses
    }

    async fn probe_health(&self, endpoint: &str) -> bool {
        match self.http.get(endpoint).timeout(HEALTH_PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    use crate::config::ProductConfig;

    struct StaticController(UnitState);

    impl ServiceController for StaticController {
        fn start(&self, _service: &str) -> Result<()> {
            Ok(())
        }

        fn stop(&self, _service: &str) -> Result<()> {
            Ok(())
        }

        fn status(&self, _service: &str) -> UnitState {
            self.0
        }

        fn pid(&self, _service: &str) -> Option<u32> {
            Some(4242)
        }

        fn reload(&self, _service: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_collect_reports_products() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure().unwrap();
        layout.write_version("siemcore-api", "v1.5.0").unwrap();

        let mut config = AgentConfig::default();
        config.instance.id = "siemcore-test".to_string();
        config.instance.instance_type = "siemcore".to_string();
        config.instance.license_key = "SIEM-AAAA-BBBB-CCCC-DDDD".to_string();
        config.products = vec![
            ProductConfig {
                name: "siemcore-api".to_string(),
                service: "siemcore-api.service".to_string(),
                binary: layout.binary("siemcore-api"),
                config: layout.product_config("siemcore-api"),
                health_endpoint: String::new(),
            },
            ProductConfig {
                name: "siemcore-collector".to_string(),
                service: "siemcore-collector.service".to_string(),
                binary: layout.binary("siemcore-collector"),
                config: layout.product_config("siemcore-collector"),
                health_endpoint: String::new(),
            },
        ];
        config.save(&layout.config_file()).unwrap();

        let reporter = Reporter::with_layout(
            config,
            layout,
            Arc::new(StaticController(UnitState::Active)),
        );
        let heartbeat = reporter.collect().await;

        assert_eq!(heartbeat.instance_id, "siemcore-test");
        assert_eq!(heartbeat.products.len(), 2);
        assert_eq!(heartbeat.products[0].version, "v1.5.0");
        assert_eq!(heartbeat.products[0].status, ProductState::Running);
        assert_eq!(heartbeat.products[0].pid, Some(4242));
        assert_eq!(heartbeat.products[1].version, "unknown");
        assert_eq!(heartbeat.config_hash.len(), 64);
        assert!(heartbeat.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_collect_maps_failed_units() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure().unwrap();

        let mut config = AgentConfig::default();
        config.products = vec![ProductConfig {
            name: "siemcore-api".to_string(),
            service: "siemcore-api.service".to_string(),
            binary: layout.binary("siemcore-api"),
            config: layout.product_config("siemcore-api"),
            health_endpoint: String::new(),
        }];

        let reporter = Reporter::with_layout(
            config,
            layout,
            Arc::new(StaticController(UnitState::Failed)),
        );
        let heartbeat = reporter.collect().await;

        assert_eq!(heartbeat.products[0].status, ProductState::Crashed);
        assert_eq!(heartbeat.products[0].pid, None);
    }
}
