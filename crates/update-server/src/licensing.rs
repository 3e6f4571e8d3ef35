//! License issuance and activation
//!
//! Key generation, instance-id derivation and the activation flow that turns
//! a license key into a registered instance with fresh credentials and an
//! install manifest.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use updates_common::{
    ActivationRequest, ActivationResponse, Channel, InstallManifest, Instance, InstanceInfo,
    InstanceStatus, License, ProductInstall,
};

use crate::storage::Storage;

const ACTIVATION_STRIPES: usize = 32;

/// Mutexes striped by instance id, guarding the activation read-or-insert.
/// Two activations for the same derived id serialize; unrelated requests
/// never contend, and nothing else in the server takes these locks.
pub struct ActivationLocks {
    stripes: Vec<Mutex<()>>,
}

impl Default for ActivationLocks {
    fn default() -> Self {
        ActivationLocks {
            stripes: (0..ACTIVATION_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }
}

impl ActivationLocks {
    pub async fn lock(&self, instance_id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        instance_id.hash(&mut hasher);
        let stripe = hasher.finish() as usize % self.stripes.len();
        self.stripes[stripe].lock().await
    }
}

/// Generate a license key `PFX-XXXX-XXXX-XXXX-XXXX` from 8 random bytes
pub fn generate_license_key(prefix: &str) -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex = hex::encode_upper(bytes);

    format!(
        "{}-{}-{}-{}-{}",
        prefix.to_uppercase(),
        &hex[0..4],
        &hex[4..8],
        &hex[8..12],
        &hex[12..16]
    )
}

/// Default key prefix for a license type
pub fn key_prefix_for(license_type: &str) -> &'static str {
    if license_type == "mysoc-cloud" {
        "MYSOC"
    } else {
        "SIEM"
    }
}

/// Generate an opaque instance API key
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("sk_inst_{}", hex::encode(bytes))
}

/// SHA-256 hex of an API key, the only form ever persisted
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// Derive the stable instance id: `<type>-<sanitized hostname>`, falling back
/// to 4 random bytes when no hostname was supplied.
pub fn derive_instance_id(license_type: &str, hostname: &str) -> String {
    let prefix = license_type.to_lowercase();

    if hostname.is_empty() {
        let mut bytes = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut bytes);
        return format!("{}-{}", prefix, hex::encode(bytes));
    }

    let host = hostname.to_lowercase().replace('.', "-");
    format!("{}-{}", prefix, host)
}

/// Build the install manifest for a license: the base product set of its
/// type plus any extra licensed products, deduplicated.
pub fn build_install_manifest(license: &License) -> InstallManifest {
    let mut products: Vec<ProductInstall> = match license.license_type.as_str() {
        "siemcore" | "siemcore-lite" => vec![
            ProductInstall::latest("siemcore-api"),
            ProductInstall::latest("siemcore-collector"),
            ProductInstall::latest("siemcore-frontend"),
            ProductInstall::latest("detection-rules"),
        ],
        "mysoc-cloud" => vec![
            ProductInstall::latest("mysoc-api"),
            ProductInstall::latest("mysoc-frontend"),
        ],
        _ => Vec::new(),
    };

    for extra in &license.products {
        if !products.iter().any(|p| &p.name == extra) {
            products.push(ProductInstall {
                name: extra.clone(),
                version: "latest".to_string(),
                channel: Channel::Stable,
            });
        }
    }

    InstallManifest {
        products,
        config_template: config_template_for(&license.license_type).to_string(),
        security_baseline: "cis-level1".to_string(),
    }
}

fn config_template_for(license_type: &str) -> &'static str {
    match license_type {
        "mysoc-cloud" => "mysoc-cloud",
        _ => "siemcore-standard",
    }
}

/// Activate a license on a host.
///
/// Policy refusals come back as `success: false` with the refusal message;
/// only storage failures surface as errors. The read-or-insert on the
/// derived instance id runs under a lock striped by that id: of two
/// concurrent activations for the same instance, the later API key is the
/// one that survives, and both callers see the final row.
pub async fn activate(
    storage: &Storage,
    locks: &ActivationLocks,
    req: &ActivationRequest,
) -> Result<ActivationResponse> {
    let Some(mut license) = storage
        .get_license_by_key(&req.license_key)
        .await
        .context("Failed to look up license")?
    else {
        return Ok(ActivationResponse::refused("invalid license key"));
    };

    if !license.is_active {
        return Ok(ActivationResponse::refused("license is not active"));
    }
    if license.is_expired(Utc::now()) {
        return Ok(ActivationResponse::refused("license has expired"));
    }
    if license.bound_elsewhere(&req.machine_id) {
        return Ok(ActivationResponse::refused(
            "license is bound to a different machine",
        ));
    }

    let instance_id = derive_instance_id(&license.license_type, &req.hostname);
    let api_key = generate_api_key();
    let api_key_hash = hash_api_key(&api_key);
    let now = Utc::now();

    // Read-or-insert on the derived id, serialized per instance id.
    // Re-activation rotates the credentials: the previous API key stops
    // resolving.
    let _guard = locks.lock(&instance_id).await;
    let instance = match storage
        .get_instance_by_name(&instance_id)
        .await
        .context("Failed to check existing instance")?
    {
        Some(mut existing) => {
            existing.hostname = req.hostname.clone();
            existing.api_key_hash = api_key_hash;
            existing.status = InstanceStatus::Online;
            existing.updated_at = now;
            storage
                .update_instance(&existing)
                .await
                .context("Failed to update instance")?;
            existing
        }
        None => {
            let instance = Instance {
                id: Uuid::new_v4().to_string(),
                instance_id: instance_id.clone(),
                instance_type: license.license_type.clone(),
                hostname: req.hostname.clone(),
                license_id: Some(license.id.clone()),
                api_key_hash,
                last_heartbeat: None,
                last_heartbeat_data: None,
                status: InstanceStatus::Online,
                created_at: now,
                updated_at: now,
            };
            storage
                .create_instance(&instance)
                .await
                .context("Failed to create instance")?;
            instance
        }
    };

    // Latch the license to this machine on first activation. Best-effort:
    // a failed write here must not fail the activation.
    if license.bound_to.as_deref().unwrap_or("").is_empty() && !req.machine_id.is_empty() {
        license.bound_to = Some(req.machine_id.clone());
        license.updated_at = now;
        if let Err(err) = storage.update_license(&license).await {
            warn!("Failed to bind license {} to machine: {}", license.id, err);
        }
    }

    let install = build_install_manifest(&license);

    info!(
        "Activated license {} as instance {}",
        license.license_key, instance.instance_id
    );

    Ok(ActivationResponse::granted(
        license,
        InstanceInfo {
            id: instance.id,
            name: instance.instance_id,
            api_key,
        },
        install,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use updates_common::LicenseLimits;

    fn license(license_type: &str, products: Vec<String>) -> License {
        let now = Utc::now();
        License {
            id: "l-1".to_string(),
            license_key: "SIEM-AAAA-BBBB-CCCC-DDDD".to_string(),
            customer_id: "acme".to_string(),
            customer_name: "Acme Corp".to_string(),
            license_type: license_type.to_string(),
            products,
            features: vec![],
            limits: LicenseLimits::default(),
            issued_at: now,
            expires_at: now + Duration::days(30),
            bound_to: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_activation_lock_serializes_per_instance_id() {
        let locks = ActivationLocks::default();
        let timeout = std::time::Duration::from_millis(50);

        let guard = locks.lock("siemcore-host").await;

        // A second activation for the same id waits for the first.
        assert!(tokio::time::timeout(timeout, locks.lock("siemcore-host"))
            .await
            .is_err());

        drop(guard);
        assert!(tokio::time::timeout(timeout, locks.lock("siemcore-host"))
            .await
            .is_ok());
    }

    #[test]
    fn test_license_key_shape() {
        let key = generate_license_key("siem");
        assert_eq!(key.len(), "SIEM-XXXX-XXXX-XXXX-XXXX".len());
        assert!(key.starts_with("SIEM-"));
        for group in key.split('-').skip(1) {
            assert_eq!(group.len(), 4);
            assert!(group.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_api_key_shape() {
        let key = generate_api_key();
        assert!(key.starts_with("sk_inst_"));
        assert_eq!(key.len(), "sk_inst_".len() + 64);
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        let hash = hash_api_key("sk_inst_00");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_api_key("sk_inst_01"));
    }

    #[test]
    fn test_instance_id_derivation() {
        assert_eq!(
            derive_instance_id("siemcore", "acme.corp.local"),
            "siemcore-acme-corp-local"
        );
        assert_eq!(derive_instance_id("SIEMCORE", "Host.Example"), "siemcore-host-example");

        // No hostname: 4 random bytes as hex.
        let random = derive_instance_id("mysoc-cloud", "");
        assert!(random.starts_with("mysoc-cloud-"));
        assert_eq!(random.len(), "mysoc-cloud-".len() + 8);
    }

    #[test]
    fn test_manifest_for_siemcore() {
        let manifest = build_install_manifest(&license("siemcore", vec![]));
        let names: Vec<&str> = manifest.products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["siemcore-api", "siemcore-collector", "siemcore-frontend", "detection-rules"]
        );
        assert_eq!(manifest.config_template, "siemcore-standard");
        assert_eq!(manifest.security_baseline, "cis-level1");
    }

    #[test]
    fn test_manifest_extras_deduped() {
        let manifest = build_install_manifest(&license(
            "mysoc-cloud",
            vec!["mysoc-api".to_string(), "threat-feed".to_string()],
        ));
        let names: Vec<&str> = manifest.products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["mysoc-api", "mysoc-frontend", "threat-feed"]);
        assert_eq!(manifest.config_template, "mysoc-cloud");
    }
}
