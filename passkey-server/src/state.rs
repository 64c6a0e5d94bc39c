//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use passkey_core::captcha::{RecaptchaClient, SiteVerifyError};
use passkey_core::{
    CaptchaGate, CeremonyError, CeremonyVerifier, ChallengeStore, CredentialRegistry,
    PasskeyService,
};
use thiserror::Error;

use crate::config::Config;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Ceremony orchestration over the registry and challenge store
    pub service: Arc<PasskeyService>,
    /// Gate in front of the ceremony start endpoints
    pub captcha: Arc<CaptchaGate>,
}

/// Failures while assembling state at startup
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid relying party configuration: {0}")]
    RelyingParty(#[from] CeremonyError),

    #[error("Failed to create CAPTCHA client: {0}")]
    Captcha(#[from] SiteVerifyError),

    #[error("CAPTCHA gating is enabled but {0} is not set")]
    MissingCaptchaSecret(&'static str),
}

impl AppState {
    pub fn new(service: Arc<PasskeyService>, captcha: Arc<CaptchaGate>) -> Self {
        Self { service, captcha }
    }

    /// Build state from configuration around an already-opened registry.
    pub fn from_config(
        config: &Config,
        registry: Arc<dyn CredentialRegistry>,
    ) -> Result<Self, StartupError> {
        let relying_party = config.relying_party()?;
        tracing::info!(
            rp_id = %relying_party.id,
            origin = %relying_party.origin,
            "WebAuthn relying party configured"
        );

        let service = PasskeyService::new(
            registry,
            Arc::new(ChallengeStore::new(config.challenge_store_config())),
            CeremonyVerifier::with_rust_crypto(relying_party),
        )
        .with_timeout_ms(config.ceremony_timeout_ms);

        let captcha = if config.recaptcha_enabled {
            // The v2 secret is needed as soon as one v3 score falls short
            if config.recaptcha_v3_secret.is_none() {
                return Err(StartupError::MissingCaptchaSecret("RECAPTCHA_V3_SECRET"));
            }
            if config.recaptcha_v2_secret.is_none() {
                return Err(StartupError::MissingCaptchaSecret("RECAPTCHA_V2_SECRET"));
            }
            let client = RecaptchaClient::new(config.recaptcha_client_config())?;
            tracing::info!(
                threshold = config.recaptcha_v3_threshold,
                "CAPTCHA gating: ENABLED"
            );
            CaptchaGate::new(config.captcha_config(), Arc::new(client))
        } else {
            tracing::warn!("CAPTCHA gating: DISABLED");
            CaptchaGate::disabled()
        };

        Ok(Self::new(Arc::new(service), Arc::new(captcha)))
    }
}
