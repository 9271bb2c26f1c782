//! Registry mode — serves the registry HTTP API from memory.
//!
//! Meant for local clusters and tests; nothing is persisted and instances
//! are never health-checked.

use std::net::SocketAddr;

use beacon_registry::MemoryRegistry;
use beacon_registry::server::{build_router, build_router_with_auth};
use tracing::info;

/// Run the dev registry until Ctrl-C.
pub async fn run_registry(port: u16, credentials: Option<(String, String)>) -> anyhow::Result<()> {
    let registry = MemoryRegistry::new();
    let router = match &credentials {
        Some((username, password)) => {
            info!(%username, "registry login required");
            build_router_with_auth(registry, username, password)
        }
        None => build_router(registry),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "dev registry listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("dev registry stopped");
    Ok(())
}
