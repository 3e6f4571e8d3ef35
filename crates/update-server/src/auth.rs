//! Request authentication
//!
//! Two surfaces: management endpoints take the static admin API key
//! (`X-API-Key` header or `api_key` query parameter) or a bearer JWT with the
//! `admin` role; dashboard endpoints take any valid bearer JWT. Tokens are
//! minted by the interactive auth subsystem, this server only verifies them.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::handlers::{ApiError, AppState};

pub const ROLE_ADMIN: &str = "admin";

/// JWT claims issued by the dashboard auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub iss: String,
    pub exp: usize,
}

/// Verify a bearer token against the configured secret and issuer
pub fn decode_token(secret: &str, issuer: &str, token: &str) -> Option<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);

    match decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
        Ok(data) => Some(data.claims),
        Err(err) => {
            debug!("Rejected bearer token: {}", err);
            None
        }
    }
}

fn bearer_claims(state: &AppState, parts: &Parts) -> Option<Claims> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    decode_token(&state.config.jwt_secret, &state.config.jwt_issuer, token)
}

fn api_key_from(parts: &Parts) -> Option<String> {
    if let Some(key) = parts.headers.get("X-API-Key") {
        return key.to_str().ok().map(str::to_string);
    }

    // Installer scripts pass the key as a query parameter.
    parts.uri.query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("api_key=").map(str::to_string))
    })
}

/// Extractor guarding management endpoints: static admin key or admin-role
/// JWT. With no admin key configured the check is skipped, matching a dev
/// setup.
pub struct RequireAdmin;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if state.config.admin_api_key.is_empty() {
            return Ok(RequireAdmin);
        }

        if let Some(key) = api_key_from(parts) {
            if key == state.config.admin_api_key {
                return Ok(RequireAdmin);
            }
            return Err(ApiError::unauthorized("invalid or missing API key"));
        }

        match bearer_claims(state, parts) {
            Some(claims) if claims.role == ROLE_ADMIN => Ok(RequireAdmin),
            Some(_) => Err(ApiError::forbidden("admin role required")),
            None => Err(ApiError::unauthorized("invalid or missing API key")),
        }
    }
}

/// Extractor guarding dashboard endpoints: any valid bearer JWT
pub struct RequireDashboard(pub Claims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireDashboard {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match bearer_claims(state, parts) {
            Some(claims) => Ok(RequireDashboard(claims)),
            None => Err(ApiError::unauthorized("missing or invalid bearer token")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, issuer: &str, role: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub: "user-1".to_string(),
            role: role.to_string(),
            iss: issuer.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_decode_valid_token() {
        let jwt = token("s3cret", "updates.test", "admin", 900);
        let claims = decode_token("s3cret", "updates.test", &jwt).unwrap();
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_rejects_wrong_secret_and_issuer() {
        let jwt = token("s3cret", "updates.test", "viewer", 900);
        assert!(decode_token("other", "updates.test", &jwt).is_none());
        assert!(decode_token("s3cret", "elsewhere", &jwt).is_none());
    }

    #[test]
    fn test_rejects_expired_token() {
        let jwt = token("s3cret", "updates.test", "admin", -3600);
        assert!(decode_token("s3cret", "updates.test", &jwt).is_none());
    }
}
