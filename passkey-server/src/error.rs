//! API error handling module
//!
//! Maps ceremony outcomes onto HTTP status codes and a `{ "error", "code" }`
//! JSON body. Verification failures are rendered identically whatever the
//! failed sub-check was; the reason is only logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use passkey_core::CeremonyError;
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Not found - requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Service unavailable - required service is not configured or available
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Ceremony error from the verification engine
    #[error("{0}")]
    Ceremony(#[from] CeremonyError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Ceremony(e) => match e {
                CeremonyError::NotFound(_) => StatusCode::NOT_FOUND,
                CeremonyError::Expired | CeremonyError::InvalidInput(_) => {
                    StatusCode::BAD_REQUEST
                }
                CeremonyError::Conflict(_) => StatusCode::CONFLICT,

                // Authentication failures → 401
                CeremonyError::VerificationFailed { .. }
                | CeremonyError::ReplayDetected { .. } => StatusCode::UNAUTHORIZED,

                CeremonyError::CaptchaRequireEscalation => StatusCode::PRECONDITION_REQUIRED,
                CeremonyError::CaptchaFailed(_) => StatusCode::FORBIDDEN,

                // Retryable conditions → 503
                CeremonyError::Transient(_) | CeremonyError::CapacityExceeded => {
                    StatusCode::SERVICE_UNAVAILABLE
                }

                CeremonyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Ceremony(e) => match e {
                CeremonyError::NotFound(_) => "NOT_FOUND",
                CeremonyError::Expired => "CHALLENGE_EXPIRED",
                CeremonyError::Conflict(_) => "CREDENTIAL_CONFLICT",
                CeremonyError::VerificationFailed { .. } => "VERIFICATION_FAILED",
                CeremonyError::ReplayDetected { .. } => "REPLAY_DETECTED",
                CeremonyError::CaptchaRequireEscalation => "CAPTCHA_V2_REQUIRED",
                CeremonyError::CaptchaFailed(_) => "CAPTCHA_FAILED",
                CeremonyError::Transient(_) => "UPSTREAM_UNAVAILABLE",
                CeremonyError::InvalidInput(_) => "INVALID_INPUT",
                CeremonyError::CapacityExceeded => "CAPACITY_EXCEEDED",
                CeremonyError::Storage(_) => "STORAGE_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            Self::Ceremony(e) => match e {
                CeremonyError::NotFound(_) => "Not found".to_string(),
                CeremonyError::Conflict(_) => "Credential already registered".to_string(),
                CeremonyError::VerificationFailed { .. } => "Verification failed".to_string(),
                CeremonyError::ReplayDetected { .. } => {
                    "Possible cloned authenticator detected".to_string()
                }
                CeremonyError::Transient(_) => "Upstream service unavailable".to_string(),
                CeremonyError::Storage(_) => "Storage error".to_string(),
                other => other.to_string(),
            },
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Ceremony(CeremonyError::CaptchaRequireEscalation)
            | Self::Ceremony(CeremonyError::CaptchaFailed(_)) => "captcha",
            Self::Ceremony(_) => "ceremony",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else if let Self::Ceremony(CeremonyError::VerificationFailed { reason }) = &self {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                reason = %reason,
                "Ceremony rejected"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        // All error responses include a `code` field for programmatic error handling
        let mut body = serde_json::json!({
            "error": client_message,
            "code": code,
        });
        if matches!(self, Self::Ceremony(CeremonyError::CaptchaRequireEscalation)) {
            body["requireV2Captcha"] = serde_json::Value::Bool(true);
        }

        (status, Json(body)).into_response()
    }
}
