//! Customer licenses and the activation handshake

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::InstallManifest;

/// A customer license
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub license_key: String,
    pub customer_id: String,
    pub customer_name: String,

    /// `mysoc-cloud`, `siemcore` or `siemcore-lite`
    #[serde(rename = "type")]
    pub license_type: String,

    pub products: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,

    pub limits: LicenseLimits,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Machine id latched by the first successful activation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_to: Option<String>,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl License {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether the binding latch rejects `machine_id`. An unbound license
    /// accepts any machine; a bound one accepts only its own.
    pub fn bound_elsewhere(&self, machine_id: &str) -> bool {
        match self.bound_to.as_deref() {
            Some(bound) if !bound.is_empty() => bound != machine_id,
            _ => false,
        }
    }
}

/// Per-license capacity limits
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LicenseLimits {
    pub max_events_per_day: i64,
    pub max_users: i32,
    pub max_data_sources: i32,
    pub max_retention_days: i32,
}

/// Request to activate a license on a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRequest {
    pub license_key: String,

    #[serde(default)]
    pub hostname: String,

    #[serde(default)]
    pub machine_id: String,
}

/// Outcome of a license activation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallManifest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActivationResponse {
    /// A deterministic policy refusal (invalid key, expired, bound elsewhere).
    pub fn refused(error: impl Into<String>) -> Self {
        ActivationResponse {
            success: false,
            license: None,
            instance: None,
            install: None,
            error: Some(error.into()),
        }
    }

    pub fn granted(license: License, instance: InstanceInfo, install: InstallManifest) -> Self {
        ActivationResponse {
            success: true,
            license: Some(license),
            instance: Some(instance),
            install: Some(install),
            error: None,
        }
    }
}

/// Credentials returned to a freshly activated instance. The API key is
/// returned in plaintext exactly once; only its hash is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub api_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn license(bound_to: Option<&str>) -> License {
        let now = Utc::now();
        License {
            id: "l-1".to_string(),
            license_key: "SIEM-AAAA-BBBB-CCCC-DDDD".to_string(),
            customer_id: "acme".to_string(),
            customer_name: "Acme Corp".to_string(),
            license_type: "siemcore".to_string(),
            products: vec![],
            features: vec![],
            limits: LicenseLimits::default(),
            issued_at: now,
            expires_at: now + Duration::days(365),
            bound_to: bound_to.map(str::to_string),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_binding_latch() {
        let unbound = license(None);
        assert!(!unbound.bound_elsewhere("m-1"));

        let bound = license(Some("m-1"));
        assert!(!bound.bound_elsewhere("m-1"));
        assert!(bound.bound_elsewhere("m-2"));
    }

    #[test]
    fn test_expiry() {
        let lic = license(None);
        assert!(!lic.is_expired(Utc::now()));
        assert!(lic.is_expired(Utc::now() + Duration::days(400)));
    }
}
