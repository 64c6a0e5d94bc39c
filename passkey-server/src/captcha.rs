//! CAPTCHA middleware for the ceremony start endpoints
//!
//! Tokens travel in request headers so the JSON bodies stay identical whether
//! gating is on or off.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the v3 (score) token
pub const V3_TOKEN_HEADER: &str = "x-captcha-token";
/// Header carrying the v2 (challenge) token after escalation
pub const V2_TOKEN_HEADER: &str = "x-captcha-token-v2";

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Reject the request unless the gate passes it.
pub async fn require_captcha(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.captcha.is_enabled() {
        let v3 = header_value(request.headers(), V3_TOKEN_HEADER);
        let v2 = header_value(request.headers(), V2_TOKEN_HEADER);
        state
            .captcha
            .evaluate(v3.as_deref(), v2.as_deref())
            .await
            .into_result()?;
    }
    Ok(next.run(request).await)
}
