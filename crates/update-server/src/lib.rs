//! Update server
//!
//! Control plane for managed instances: issues and activates licenses,
//! catalogs signed release artifacts, receives heartbeats and advertises
//! newer releases back to the fleet.

pub mod artifacts;
pub mod auth;
pub mod config;
pub mod handlers;
pub mod licensing;
pub mod storage;
pub mod sweep;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use artifacts::ArtifactStore;
pub use config::Config;
pub use handlers::AppState;
pub use licensing::ActivationLocks;
pub use storage::Storage;

/// Bound on reading and handling one request (15s read / 15s write)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Create the application router
pub fn create_router(shared_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        // License activation and validation (public: agents hold only a key)
        .route(
            "/api/v1/license/activate",
            post(handlers::licenses::activate_handler),
        )
        .route(
            "/api/v1/license/validate",
            post(handlers::licenses::validate_handler),
        )
        // Heartbeat intake
        .route("/api/v1/heartbeat", post(handlers::heartbeat::heartbeat_handler))
        // Release catalog
        .route(
            "/api/v1/releases",
            get(handlers::releases::list_releases_handler)
                .post(handlers::releases::upload_release_handler),
        )
        .route(
            "/api/v1/releases/:product",
            get(handlers::releases::list_product_releases_handler),
        )
        .route(
            "/api/v1/releases/:product/latest",
            get(handlers::releases::latest_release_handler),
        )
        .route(
            "/api/v1/releases/:product/:version",
            get(handlers::releases::get_release_handler)
                .delete(handlers::releases::delete_release_handler),
        )
        .route(
            "/api/v1/releases/:product/:version/download",
            get(handlers::releases::download_release_handler),
        )
        .route(
            "/api/v1/releases/:product/:version/:filename",
            put(handlers::releases::upload_binary_handler),
        )
        // Instances
        .route(
            "/api/v1/instances",
            get(handlers::instances::list_instances_handler),
        )
        .route(
            "/api/v1/instances/:id",
            get(handlers::instances::get_instance_handler)
                .delete(handlers::instances::delete_instance_handler),
        )
        // Admin license management
        .route(
            "/api/v1/admin/licenses",
            get(handlers::licenses::list_licenses_handler)
                .post(handlers::licenses::create_license_handler),
        )
        .route(
            "/api/v1/admin/licenses/:id",
            get(handlers::licenses::get_license_handler)
                .put(handlers::licenses::update_license_handler)
                .delete(handlers::licenses::delete_license_handler),
        )
        // Direct binary fetch in the installer-script path shape. Static
        // routes above win over the wildcard.
        .route(
            "/:product/:version/:filename",
            get(handlers::releases::direct_download_handler),
        )
        .with_state(shared_state)
        // Artifact uploads are operator-driven and can be large; size policy
        // belongs to the proxy in front, not this router.
        .layer(DefaultBodyLimit::disable())
        // Read + handle must finish within 15s; streamed response bodies
        // are not bounded by this, matching the write-side grace.
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
