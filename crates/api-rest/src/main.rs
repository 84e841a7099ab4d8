//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own, without the workspace's `recordlink-run` wrapper.
//!
//! ## Intended use
//! Useful during development when iterating on handlers with the Swagger UI open.

use api_rest::{router, AppState};
use recordlink_core::constants::{DEFAULT_REST_ADDR, REST_ADDR_VAR};
use recordlink_core::{CoreConfig, SharingService};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the Record Link REST API server
///
/// # Environment Variables
/// - `RECORDLINK_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `RECORDLINK_*`: core settings, see [`CoreConfig::from_lookup`]
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the core configuration is invalid or the storage directory cannot be created,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var(REST_ADDR_VAR).unwrap_or_else(|_| DEFAULT_REST_ADDR.into());
    let cfg = CoreConfig::from_lookup(|name| std::env::var(name).ok())?;
    let sharing = Arc::new(SharingService::new(cfg)?);

    tracing::info!("-- Starting Record Link REST API on {}", addr);

    let app = router(AppState::new(sharing));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
