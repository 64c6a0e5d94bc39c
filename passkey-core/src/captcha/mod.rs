//! Adaptive CAPTCHA gate for ceremony entry points
//!
//! Decision ladder over an optional v3 (risk score) token and an optional v2
//! (challenge) token:
//!
//! 1. gating disabled: pass
//! 2. v2 token present: pass iff the service accepts it
//! 3. v3 token present: fail if rejected, pass if `score >= threshold`,
//!    otherwise ask the client to escalate to a v2 challenge
//! 4. no token: fail
//!
//! An unreachable verification service is [`CaptchaVerdict::Transient`], never
//! a failed human check. An answer the service refuses or garbles is a failed
//! check. The gate does not retry: provider tokens are single use.

#[cfg(feature = "network")]
mod recaptcha;

#[cfg(feature = "network")]
pub use recaptcha::{RecaptchaClient, RecaptchaClientConfig, DEFAULT_VERIFY_URL};

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::error::{CaptchaFailure, CeremonyError};

/// Default minimum v3 score
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.5;

/// Outcome of [`CaptchaGate::evaluate`]
#[derive(Debug, Clone, PartialEq)]
pub enum CaptchaVerdict {
    Pass,
    /// The v3 score was too low; retry the same request with a v2 token
    RequireEscalation,
    Fail { reason: CaptchaFailure },
    /// The verification service could not be reached; safe to retry
    Transient,
}

impl CaptchaVerdict {
    /// `Ok(())` for [`CaptchaVerdict::Pass`], the matching error otherwise.
    pub fn into_result(self) -> Result<(), CeremonyError> {
        match self {
            Self::Pass => Ok(()),
            Self::RequireEscalation => Err(CeremonyError::CaptchaRequireEscalation),
            Self::Fail { reason } => Err(CeremonyError::CaptchaFailed(reason)),
            Self::Transient => Err(CeremonyError::Transient(
                "CAPTCHA verification service unavailable".into(),
            )),
        }
    }
}

/// Site-verify response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteVerifyResponse {
    pub success: bool,
    /// v3 only
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub challenge_ts: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default, rename = "error-codes")]
    pub error_codes: Vec<String>,
}

/// Transport-level problems talking to the verification service
#[derive(Error, Debug)]
pub enum SiteVerifyError {
    #[error("Verification request timed out")]
    Timeout,

    #[error("Verification service unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected verification response: {0}")]
    InvalidResponse(String),
}

/// Token verification service
#[async_trait]
pub trait SiteVerifier: Send + Sync {
    async fn verify(&self, token: &str, secret: &str)
        -> Result<SiteVerifyResponse, SiteVerifyError>;
}

#[derive(Clone)]
pub struct CaptchaConfig {
    pub enabled: bool,
    pub v3_secret: Option<String>,
    pub v2_secret: Option<String>,
    /// Inclusive minimum v3 score
    pub score_threshold: f64,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            v3_secret: None,
            v2_secret: None,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

impl std::fmt::Debug for CaptchaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("CaptchaConfig")
            .field("enabled", &self.enabled)
            .field("v3_secret", &redact(&self.v3_secret))
            .field("v2_secret", &redact(&self.v2_secret))
            .field("score_threshold", &self.score_threshold)
            .finish()
    }
}

pub struct CaptchaGate {
    config: CaptchaConfig,
    verifier: Option<Arc<dyn SiteVerifier>>,
}

impl CaptchaGate {
    pub fn new(config: CaptchaConfig, verifier: Arc<dyn SiteVerifier>) -> Self {
        Self {
            config,
            verifier: Some(verifier),
        }
    }

    /// Gate that passes every request
    pub fn disabled() -> Self {
        Self {
            config: CaptchaConfig::default(),
            verifier: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Decide whether a gated request may proceed.
    ///
    /// Empty or whitespace-only tokens count as absent.
    pub async fn evaluate(&self, v3_token: Option<&str>, v2_token: Option<&str>) -> CaptchaVerdict {
        if !self.config.enabled {
            return CaptchaVerdict::Pass;
        }
        let Some(verifier) = self.verifier.as_deref() else {
            tracing::error!("CAPTCHA gating enabled without a verification client");
            return CaptchaVerdict::Transient;
        };

        if let Some(token) = present(v2_token) {
            let secret = self.config.v2_secret.as_deref();
            let response = match self.call(verifier, token, secret, "v2").await {
                Ok(response) => response,
                Err(verdict) => return verdict,
            };
            return if response.success {
                tracing::debug!("CAPTCHA v2 passed");
                CaptchaVerdict::Pass
            } else {
                tracing::warn!(error_codes = ?response.error_codes, "CAPTCHA v2 rejected");
                CaptchaVerdict::Fail {
                    reason: CaptchaFailure::Rejected,
                }
            };
        }

        if let Some(token) = present(v3_token) {
            let secret = self.config.v3_secret.as_deref();
            let response = match self.call(verifier, token, secret, "v3").await {
                Ok(response) => response,
                Err(verdict) => return verdict,
            };
            if !response.success {
                tracing::warn!(error_codes = ?response.error_codes, "CAPTCHA v3 rejected");
                return CaptchaVerdict::Fail {
                    reason: CaptchaFailure::Rejected,
                };
            }
            return match response.score {
                Some(score) if score >= self.config.score_threshold => {
                    tracing::debug!(score, "CAPTCHA v3 passed");
                    CaptchaVerdict::Pass
                }
                score => {
                    tracing::info!(
                        ?score,
                        threshold = self.config.score_threshold,
                        "CAPTCHA v3 score too low, requesting v2 challenge"
                    );
                    CaptchaVerdict::RequireEscalation
                }
            };
        }

        tracing::warn!("CAPTCHA token missing on gated request");
        CaptchaVerdict::Fail {
            reason: CaptchaFailure::MissingToken,
        }
    }

    async fn call(
        &self,
        verifier: &dyn SiteVerifier,
        token: &str,
        secret: Option<&str>,
        version: &'static str,
    ) -> Result<SiteVerifyResponse, CaptchaVerdict> {
        let Some(secret) = secret else {
            tracing::error!(version, "CAPTCHA secret not configured");
            return Err(CaptchaVerdict::Transient);
        };
        verifier.verify(token, secret).await.map_err(|e| match e {
            SiteVerifyError::Timeout | SiteVerifyError::Unavailable(_) => {
                tracing::warn!(version, error = %e, "CAPTCHA verification service unreachable");
                CaptchaVerdict::Transient
            }
            SiteVerifyError::InvalidResponse(_) => {
                tracing::warn!(version, error = %e, "CAPTCHA verification service refused the request");
                CaptchaVerdict::Fail {
                    reason: CaptchaFailure::Rejected,
                }
            }
        })
    }
}

fn present(token: Option<&str>) -> Option<&str> {
    token.map(str::trim).filter(|t| !t.is_empty())
}

impl std::fmt::Debug for CaptchaGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted verifier recording which secret each call used
    #[derive(Default)]
    struct StubVerifier {
        response: Option<SiteVerifyResponse>,
        /// Returned when `response` is `None`; `None` means a timeout
        error: Option<fn() -> SiteVerifyError>,
        calls: AtomicUsize,
        secrets: Mutex<Vec<String>>,
    }

    impl StubVerifier {
        fn answering(success: bool, score: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                response: Some(SiteVerifyResponse {
                    success,
                    score,
                    ..Default::default()
                }),
                ..Default::default()
            })
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn failing(error: fn() -> SiteVerifyError) -> Arc<Self> {
            Arc::new(Self {
                error: Some(error),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl SiteVerifier for StubVerifier {
        async fn verify(
            &self,
            _token: &str,
            secret: &str,
        ) -> Result<SiteVerifyResponse, SiteVerifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.secrets.lock().unwrap().push(secret.to_string());
            match (&self.response, self.error) {
                (Some(response), _) => Ok(response.clone()),
                (None, Some(error)) => Err(error()),
                (None, None) => Err(SiteVerifyError::Timeout),
            }
        }
    }

    fn enabled() -> CaptchaConfig {
        CaptchaConfig {
            enabled: true,
            v3_secret: Some("v3-secret".into()),
            v2_secret: Some("v2-secret".into()),
            score_threshold: 0.5,
        }
    }

    #[tokio::test]
    async fn test_disabled_passes_everything() {
        let stub = StubVerifier::answering(false, None);
        let gate = CaptchaGate::new(CaptchaConfig::default(), stub.clone());

        assert_eq!(gate.evaluate(None, None).await, CaptchaVerdict::Pass);
        assert_eq!(gate.evaluate(Some("x"), None).await, CaptchaVerdict::Pass);
        assert_eq!(gate.evaluate(None, Some("y")).await, CaptchaVerdict::Pass);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);

        assert_eq!(
            CaptchaGate::disabled().evaluate(None, None).await,
            CaptchaVerdict::Pass
        );
    }

    #[tokio::test]
    async fn test_missing_tokens_fail() {
        let gate = CaptchaGate::new(enabled(), StubVerifier::answering(true, Some(0.9)));
        assert_eq!(
            gate.evaluate(None, None).await,
            CaptchaVerdict::Fail {
                reason: CaptchaFailure::MissingToken
            }
        );
        assert_eq!(
            gate.evaluate(Some(""), Some("  ")).await,
            CaptchaVerdict::Fail {
                reason: CaptchaFailure::MissingToken
            }
        );
    }

    #[tokio::test]
    async fn test_score_threshold_is_inclusive() {
        let at = CaptchaGate::new(enabled(), StubVerifier::answering(true, Some(0.5)));
        assert_eq!(at.evaluate(Some("t"), None).await, CaptchaVerdict::Pass);

        let below = CaptchaGate::new(enabled(), StubVerifier::answering(true, Some(0.4)));
        assert_eq!(
            below.evaluate(Some("t"), None).await,
            CaptchaVerdict::RequireEscalation
        );
    }

    #[tokio::test]
    async fn test_v3_without_score_escalates() {
        let gate = CaptchaGate::new(enabled(), StubVerifier::answering(true, None));
        assert_eq!(
            gate.evaluate(Some("t"), None).await,
            CaptchaVerdict::RequireEscalation
        );
    }

    #[tokio::test]
    async fn test_v3_rejected_fails() {
        let gate = CaptchaGate::new(enabled(), StubVerifier::answering(false, Some(0.9)));
        assert_eq!(
            gate.evaluate(Some("t"), None).await,
            CaptchaVerdict::Fail {
                reason: CaptchaFailure::Rejected
            }
        );
    }

    #[tokio::test]
    async fn test_v2_takes_priority_and_uses_v2_secret() {
        let stub = StubVerifier::answering(true, None);
        let gate = CaptchaGate::new(enabled(), stub.clone());

        assert_eq!(gate.evaluate(Some("v3"), Some("v2")).await, CaptchaVerdict::Pass);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*stub.secrets.lock().unwrap(), vec!["v2-secret".to_string()]);
    }

    #[tokio::test]
    async fn test_v2_rejected_fails() {
        let gate = CaptchaGate::new(enabled(), StubVerifier::answering(false, None));
        assert_eq!(
            gate.evaluate(None, Some("v2")).await,
            CaptchaVerdict::Fail {
                reason: CaptchaFailure::Rejected
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient_without_retry() {
        let stub = StubVerifier::unreachable();
        let gate = CaptchaGate::new(enabled(), stub.clone());

        assert_eq!(gate.evaluate(Some("t"), None).await, CaptchaVerdict::Transient);
        assert_eq!(gate.evaluate(None, Some("t")).await, CaptchaVerdict::Transient);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);

        let gate = CaptchaGate::new(
            enabled(),
            StubVerifier::failing(|| SiteVerifyError::Unavailable("status 503".into())),
        );
        assert_eq!(gate.evaluate(Some("t"), None).await, CaptchaVerdict::Transient);
    }

    #[tokio::test]
    async fn test_refused_or_garbled_answer_fails() {
        let gate = CaptchaGate::new(
            enabled(),
            StubVerifier::failing(|| {
                SiteVerifyError::InvalidResponse("site-verify returned status 400".into())
            }),
        );
        let rejected = CaptchaVerdict::Fail {
            reason: CaptchaFailure::Rejected,
        };

        assert_eq!(gate.evaluate(None, Some("tok")).await, rejected);
        assert_eq!(gate.evaluate(Some("tok"), None).await, rejected);
    }

    #[test]
    fn test_verdict_into_result() {
        assert!(CaptchaVerdict::Pass.into_result().is_ok());
        assert!(matches!(
            CaptchaVerdict::RequireEscalation.into_result(),
            Err(CeremonyError::CaptchaRequireEscalation)
        ));
        assert!(matches!(
            CaptchaVerdict::Transient.into_result(),
            Err(CeremonyError::Transient(_))
        ));
    }

    #[test]
    fn test_config_debug_redacts_secrets() {
        let debug = format!("{:?}", enabled());
        assert!(!debug.contains("v3-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_site_verify_response_deserializes_error_codes() {
        let body = r#"{"success":false,"error-codes":["invalid-input-response"]}"#;
        let parsed: SiteVerifyResponse = serde_json::from_str(body).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error_codes, vec!["invalid-input-response"]);
        assert!(parsed.score.is_none());
    }
}
