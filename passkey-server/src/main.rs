//! Passkey Server - REST API for passwordless registration and sign-in
//!
//! Endpoints:
//! - POST /api/auth/register/start - Issue registration options (CAPTCHA gated)
//! - POST /api/auth/register/finish - Verify an attestation and store the passkey
//! - POST /api/auth/authenticate/start - Issue assertion options (CAPTCHA gated)
//! - POST /api/auth/authenticate/finish - Verify an assertion
//! - GET /health, GET /ready, GET /api/auth/health

use std::net::SocketAddr;
use std::time::Duration;

use passkey_server::{create_router_with_config, registry_from_config, AppState, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,passkey_server=debug,passkey_core=debug")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "Configuration loaded");

    let registry = registry_from_config(&config).await?;
    let state = AppState::from_config(&config, registry)?;

    // Periodic eviction of challenges that were never finished
    let sweeper = state.service.clone();
    let sweep_every = Duration::from_secs(config.challenge_sweep_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let removed = sweeper.sweep_expired_challenges();
            if removed > 0 {
                tracing::debug!(removed, "Swept expired challenges");
            }
        }
    });

    let app = create_router_with_config(&config, state);
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Passkey server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
