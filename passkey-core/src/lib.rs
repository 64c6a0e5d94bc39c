//! Passkey Core - WebAuthn ceremony verification engine
//!
//! This crate implements the server side of passwordless registration and
//! authentication ceremonies for a single relying party.
//!
//! # Features
//!
//! - Single-use, expiring, bounded challenge store
//! - Credential registry contract with globally unique credential ids
//! - Registration and authentication verification (ES256, RS256)
//! - Strict signature-counter enforcement against cloned authenticators
//! - Adaptive CAPTCHA gate (v3 score with v2 escalation)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use passkey_core::{
//!     CeremonyVerifier, ChallengeStore, MemoryCredentialRegistry, PasskeyService, RelyingParty,
//!     SoftAuthenticator,
//! };
//!
//! # async fn example() -> passkey_core::Result<()> {
//! let rp = RelyingParty::new("example.com", "Example", "https://example.com")?;
//! let service = PasskeyService::new(
//!     Arc::new(MemoryCredentialRegistry::new()),
//!     Arc::new(ChallengeStore::default()),
//!     CeremonyVerifier::with_rust_crypto(rp),
//! );
//!
//! let options = service.start_registration("alice", "Alice").await?;
//! let challenge = passkey_core::model::base64url_decode(&options.challenge).unwrap();
//!
//! let authenticator = SoftAuthenticator::new("example.com", "https://example.com");
//! let response = authenticator.register(&challenge);
//! service
//!     .finish_registration(
//!         "alice",
//!         authenticator.credential_id(),
//!         &response.client_data_json,
//!         &response.attestation_object,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod captcha;
pub mod challenge;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod model;
pub mod registry;
pub mod service;
pub mod soft_authenticator;
pub mod verifier;

// Re-export main types for convenience
pub use captcha::{CaptchaConfig, CaptchaGate, CaptchaVerdict, SiteVerifier, SiteVerifyResponse};
pub use challenge::{Challenge, ChallengeStore, ChallengeStoreConfig};
pub use crypto::{CryptoProvider, RustCryptoProvider};
pub use error::{CaptchaFailure, CeremonyError, Result, VerificationFailure};
pub use model::{
    AttestationFormat, CoseAlgorithm, Credential, CredentialId, CredentialPublicKey, Identity,
};
pub use registry::{CredentialRegistry, MemoryCredentialRegistry};
pub use service::{AuthenticationOptions, PasskeyService, RegistrationOptions};
pub use soft_authenticator::SoftAuthenticator;
pub use verifier::{CeremonyVerifier, RelyingParty};

// Network-dependent exports
#[cfg(feature = "network")]
pub use captcha::{RecaptchaClient, RecaptchaClientConfig};
