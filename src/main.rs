use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use recordlink_core::constants::{DEFAULT_REST_ADDR, REST_ADDR_VAR};
use recordlink_core::{CoreConfig, SharingService};

/// Main entry point for the Record Link server
///
/// Resolves configuration once, opens the file store and serves the REST API (with Swagger UI
/// at `/swagger-ui`) until interrupted.
///
/// # Environment Variables
/// - `RECORDLINK_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `RECORDLINK_STORAGE_DIR`: File store root (default: "file_store")
/// - `RECORDLINK_PUBLIC_URL`: Base URL of issued file locators (default: "http://localhost:3000")
/// - `RECORDLINK_APP_URL`: Base of the access URL embedded in link codes (optional)
/// - `RECORDLINK_SIGNING_KEY`: Locator HMAC key, at least 32 bytes (required)
/// - `RECORDLINK_LINK_TTL_SECS`: Default link lifetime (default: 3600)
/// - `RECORDLINK_MAX_LINK_FILES`: File references allowed per link token (default: 10)
///
/// # Returns
/// * `Ok(())` - If the server starts and shuts down cleanly
/// * `Err(anyhow::Error)` - If configuration, startup or the server itself fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("recordlink=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr: SocketAddr = std::env::var(REST_ADDR_VAR)
        .unwrap_or_else(|_| DEFAULT_REST_ADDR.into())
        .parse()?;

    let cfg = CoreConfig::from_lookup(|name| std::env::var(name).ok())?;
    tracing::info!(
        storage_dir = %cfg.storage_dir().display(),
        public_url = cfg.public_url(),
        "++ Resolved configuration"
    );
    let sharing = Arc::new(SharingService::new(cfg)?);

    tracing::info!("++ Starting Record Link REST on {}", rest_addr);

    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    axum::serve(listener, router(AppState::new(sharing)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("-- Record Link REST stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {:?}", e);
    }
}
