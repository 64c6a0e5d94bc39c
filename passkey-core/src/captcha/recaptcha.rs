//! reCAPTCHA site-verify client
//!
//! One POST per token with an explicit timeout. No retries: a token can only
//! be verified once, so a second attempt would be rejected by the provider.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{SiteVerifier, SiteVerifyError, SiteVerifyResponse};

/// Google's site-verify endpoint
pub const DEFAULT_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(Debug, Clone)]
pub struct RecaptchaClientConfig {
    pub verify_url: String,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl Default for RecaptchaClientConfig {
    fn default() -> Self {
        Self {
            verify_url: DEFAULT_VERIFY_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct RecaptchaClient {
    client: Client,
    verify_url: String,
}

impl RecaptchaClient {
    pub fn new(config: RecaptchaClientConfig) -> Result<Self, SiteVerifyError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SiteVerifyError::Unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            verify_url: config.verify_url,
        })
    }
}

#[async_trait]
impl SiteVerifier for RecaptchaClient {
    async fn verify(
        &self,
        token: &str,
        secret: &str,
    ) -> Result<SiteVerifyResponse, SiteVerifyError> {
        let start = Instant::now();

        let response = self
            .client
            .post(&self.verify_url)
            .form(&[("secret", secret), ("response", token)])
            .send()
            .await
            .map_err(|e| {
                let latency_ms = start.elapsed().as_millis() as u64;
                warn!(error = %e, latency_ms, "Site-verify request failed");
                if e.is_timeout() {
                    SiteVerifyError::Timeout
                } else {
                    SiteVerifyError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        debug!(status = %status, "Received site-verify response");
        if !status.is_success() {
            return Err(if is_transient_status(status) {
                SiteVerifyError::Unavailable(format!("site-verify returned status {status}"))
            } else {
                SiteVerifyError::InvalidResponse(format!("site-verify returned status {status}"))
            });
        }

        let parsed: SiteVerifyResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                SiteVerifyError::Timeout
            } else {
                warn!(error = %e, "Failed to parse site-verify response");
                SiteVerifyError::InvalidResponse(e.to_string())
            }
        })?;

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            success = parsed.success,
            "Site-verify completed"
        );
        Ok(parsed)
    }
}

impl std::fmt::Debug for RecaptchaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecaptchaClient")
            .field("verify_url", &self.verify_url)
            .finish_non_exhaustive()
    }
}

/// Whether an HTTP status means the service is temporarily unable to answer.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status_codes() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_default_config_targets_google() {
        let config = RecaptchaClientConfig::default();
        assert_eq!(config.verify_url, DEFAULT_VERIFY_URL);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let client = RecaptchaClient::new(RecaptchaClientConfig {
            // Port 9 (discard) on loopback is closed on test machines
            verify_url: "http://127.0.0.1:9/siteverify".into(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();

        let err = client.verify("token", "secret").await.unwrap_err();
        assert!(matches!(
            err,
            SiteVerifyError::Unavailable(_) | SiteVerifyError::Timeout
        ));
    }
}
