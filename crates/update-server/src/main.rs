//! Update server entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use update_server::{
    create_router, sweep, ActivationLocks, AppState, ArtifactStore, Config, Storage,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "update_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    if config.admin_api_key.is_empty() {
        warn!("ADMIN_API_KEY is not set, management endpoints are unprotected");
    }
    if config.storage_type != "local" {
        anyhow::bail!("unsupported storage type: {}", config.storage_type);
    }

    info!("Starting update server v{}", env!("CARGO_PKG_VERSION"));
    info!("Redis URL: {}", config.redis_url);
    info!("Artifact storage: {}", config.storage_path);

    // Initialize the registries and the blob store
    let storage = Storage::new(&config.redis_url)
        .await
        .context("Failed to initialize storage")?;
    let artifacts = ArtifactStore::new(&config.storage_path)
        .await
        .context("Failed to initialize artifact store")?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        storage,
        artifacts,
        activation_locks: ActivationLocks::default(),
        config,
    });

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweep::run(state.clone(), shutdown.child_token()));

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Update server listening on http://{}", addr);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()));

    // Drain in-flight requests after the signal, but not forever.
    let drain_cap = async {
        shutdown.cancelled().await;
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    };

    tokio::select! {
        result = server => result.context("Server error")?,
        _ = drain_cap => warn!("Drain deadline reached, exiting with requests in flight"),
    }

    sweeper.await.ok();
    info!("Server exited gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutting down server...");
    shutdown.cancel();
}
