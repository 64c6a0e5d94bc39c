//! Health check handlers
//!
//! Provides health and readiness endpoints for monitoring and orchestration.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

/// Liveness body for `/api/auth/health`
#[derive(Serialize)]
pub struct AuthHealthResponse {
    pub status: &'static str,
}

/// GET /api/auth/health - ceremony API liveness
pub async fn auth_health() -> Json<AuthHealthResponse> {
    Json(AuthHealthResponse { status: "ok" })
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status: "healthy" or "degraded"
    pub status: &'static str,
    /// Server version from Cargo.toml
    pub version: &'static str,
    /// Service name
    pub service: &'static str,
    /// Credential registry backend ("memory" or "postgres")
    pub storage: &'static str,
    pub captcha_enabled: bool,
    /// Challenges currently awaiting a finish call
    pub pending_challenges: usize,
}

/// GET /health - Health check endpoint
///
/// Degraded when the credential registry does not answer.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.service.registry();
    let status = match registry.check_health().await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::warn!(error = %e, "Registry health check failed");
            "degraded"
        }
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        service: "passkey-server",
        storage: registry.backend_name(),
        captcha_enabled: state.captcha.is_enabled(),
        pending_challenges: state.service.challenges().len(),
    })
}

/// Readiness response for Kubernetes
#[derive(Serialize)]
pub struct ReadyResponse {
    /// Whether the service is ready to accept traffic
    pub ready: bool,
    /// Optional message explaining status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// GET /ready - Kubernetes readiness probe
pub async fn ready() -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: true,
        message: None,
    })
}
