//! The four ceremony operations
//!
//! [`PasskeyService`] wires the challenge store, the credential registry and the
//! verifier together. Each finish operation is all-or-nothing: nothing is written
//! to the registry unless verification succeeded. The challenge, however, is
//! consumed on every finish attempt, successful or not.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::challenge::{anonymous_binding_key, is_anonymous_binding_key, ChallengeStore};
use crate::error::{CeremonyError, Result};
use crate::model::{CoseAlgorithm, Credential, CredentialId, Identity};
use crate::registry::CredentialRegistry;
use crate::verifier::{AuthenticationInput, CeremonyVerifier, RegistrationInput};

/// Default client-side ceremony timeout advertised in options
pub const DEFAULT_CEREMONY_TIMEOUT_MS: u64 = 60_000;

const PUBLIC_KEY_TYPE: &str = "public-key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelyingPartyInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// base64url opaque identity id
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub alg: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// base64url credential id
    pub id: String,
}

impl From<&Credential> for CredentialDescriptor {
    fn from(credential: &Credential) -> Self {
        Self {
            kind: PUBLIC_KEY_TYPE,
            id: credential.credential_id.to_base64url(),
        }
    }
}

/// Options returned by registration start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    /// base64url challenge
    pub challenge: String,
    pub rp: RelyingPartyInfo,
    pub user: UserInfo,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    /// Credentials the identity already holds
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub timeout: u64,
    pub attestation: &'static str,
}

/// Options returned by authentication start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub challenge: String,
    pub rp_id: String,
    /// Empty for discoverable-credential flows
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub timeout: u64,
    pub user_verification: &'static str,
}

pub struct PasskeyService {
    registry: Arc<dyn CredentialRegistry>,
    challenges: Arc<ChallengeStore>,
    verifier: CeremonyVerifier,
    timeout_ms: u64,
}

impl PasskeyService {
    pub fn new(
        registry: Arc<dyn CredentialRegistry>,
        challenges: Arc<ChallengeStore>,
        verifier: CeremonyVerifier,
    ) -> Self {
        Self {
            registry,
            challenges,
            verifier,
            timeout_ms: DEFAULT_CEREMONY_TIMEOUT_MS,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn registry(&self) -> &Arc<dyn CredentialRegistry> {
        &self.registry
    }

    pub fn challenges(&self) -> &Arc<ChallengeStore> {
        &self.challenges
    }

    /// Begin registration, creating the identity on first use.
    ///
    /// A blank display name falls back to the handle.
    pub async fn start_registration(
        &self,
        handle: &str,
        display_name: &str,
    ) -> Result<RegistrationOptions> {
        let handle = validate_handle(handle)?;
        let display_name = match display_name.trim() {
            "" => handle,
            name => name,
        };

        let identity = self
            .registry
            .find_or_create_identity(handle, display_name)
            .await?;
        let existing = self.registry.list_by_identity(&identity).await?;
        let challenge = self.challenges.issue(handle)?;

        tracing::info!(handle = %handle, "Registration started");

        let rp = self.verifier.relying_party();
        Ok(RegistrationOptions {
            challenge: challenge.to_base64url(),
            rp: RelyingPartyInfo {
                id: rp.id.clone(),
                name: rp.name.clone(),
            },
            user: UserInfo {
                id: identity.opaque_handle(),
                name: identity.handle.clone(),
                display_name: identity.display_name.clone(),
            },
            pub_key_cred_params: CoseAlgorithm::ALLOWED
                .iter()
                .map(|alg| PubKeyCredParam {
                    kind: PUBLIC_KEY_TYPE,
                    alg: alg.cose_id(),
                })
                .collect(),
            exclude_credentials: existing.iter().map(CredentialDescriptor::from).collect(),
            timeout: self.timeout_ms,
            attestation: "none",
        })
    }

    /// Verify a registration response and store the new credential.
    pub async fn finish_registration(
        &self,
        handle: &str,
        credential_id: &CredentialId,
        client_data_json: &[u8],
        attestation_object: &[u8],
    ) -> Result<Credential> {
        let handle = validate_handle(handle)?;
        let identity = self
            .registry
            .find_identity(handle)
            .await?
            .ok_or_else(|| CeremonyError::not_found("identity"))?;
        let challenge = self.challenges.consume_and_invalidate(handle)?;

        let credential = self.verifier.verify_registration(RegistrationInput {
            identity: &identity,
            challenge: challenge.as_bytes(),
            credential_id,
            client_data_json,
            attestation_object,
            now: Utc::now(),
        })?;

        self.registry.add(&identity, credential.clone()).await?;

        tracing::info!(
            handle = %handle,
            credential_id = %credential.credential_id,
            attestation = credential.attestation_format.as_str(),
            "Passkey registered"
        );
        Ok(credential)
    }

    /// Begin authentication.
    ///
    /// With a handle the allow-list names that identity's credentials; without
    /// one the challenge is bound anonymously for a discoverable-credential flow.
    pub async fn start_authentication(&self, handle: Option<&str>) -> Result<AuthenticationOptions> {
        let (challenge, allow_credentials) = match handle {
            Some(handle) => {
                let handle = validate_handle(handle)?;
                let identity = self
                    .registry
                    .find_identity(handle)
                    .await?
                    .ok_or_else(|| CeremonyError::not_found("identity"))?;
                let credentials = self.registry.list_by_identity(&identity).await?;
                let challenge = self.challenges.issue(handle)?;
                tracing::info!(handle = %handle, credentials = credentials.len(), "Authentication started");
                (
                    challenge,
                    credentials.iter().map(CredentialDescriptor::from).collect(),
                )
            }
            None => {
                let (_, challenge) = self.challenges.issue_anonymous()?;
                tracing::info!("Discoverable authentication started");
                (challenge, Vec::new())
            }
        };

        Ok(AuthenticationOptions {
            challenge: challenge.to_base64url(),
            rp_id: self.verifier.relying_party().id.clone(),
            allow_credentials,
            timeout: self.timeout_ms,
            user_verification: "preferred",
        })
    }

    /// Verify an assertion and advance the stored counter.
    ///
    /// The challenge is looked up under the anonymous key derived from the echoed
    /// challenge first, then under the credential owner's handle.
    pub async fn finish_authentication(
        &self,
        credential_id: &CredentialId,
        client_data_json: &[u8],
        authenticator_data: &[u8],
        signature: &[u8],
    ) -> Result<Identity> {
        let echoed = self.verifier.echoed_challenge(client_data_json)?;
        let anonymous = match self
            .challenges
            .consume_and_invalidate(&anonymous_binding_key(&echoed))
        {
            Ok(challenge) => Some(challenge),
            Err(CeremonyError::NotFound(_)) => None,
            Err(other) => return Err(other),
        };

        let (credential, owner) = self
            .registry
            .find_by_credential_id(credential_id)
            .await?
            .ok_or_else(|| CeremonyError::not_found("credential"))?;

        let challenge = match anonymous {
            Some(challenge) => challenge,
            None => self.challenges.consume_and_invalidate(&owner.handle)?,
        };

        let outcome = self.verifier.verify_authentication(AuthenticationInput {
            credential: &credential,
            challenge: challenge.as_bytes(),
            client_data_json,
            authenticator_data,
            signature,
            now: Utc::now(),
        })?;

        self.registry
            .update_counter(credential_id, outcome.new_counter, outcome.used_at)
            .await?;

        tracing::info!(
            handle = %owner.handle,
            credential_id = %credential_id,
            sign_count = outcome.new_counter,
            "Passkey authentication succeeded"
        );
        Ok(owner)
    }

    /// Evict expired challenges. Returns how many were removed.
    pub fn sweep_expired_challenges(&self) -> usize {
        self.challenges.sweep_expired()
    }
}

impl std::fmt::Debug for PasskeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasskeyService")
            .field("registry", &self.registry.backend_name())
            .field("challenges", &self.challenges)
            .field("verifier", &self.verifier)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

fn validate_handle(handle: &str) -> Result<&str> {
    let handle = handle.trim();
    if handle.is_empty() {
        return Err(CeremonyError::InvalidInput("username is required".into()));
    }
    // Would collide with discoverable-flow binding keys
    if is_anonymous_binding_key(handle) {
        return Err(CeremonyError::InvalidInput("username is reserved".into()));
    }
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryCredentialRegistry;
    use crate::soft_authenticator::SoftAuthenticator;
    use crate::verifier::RelyingParty;

    const RP_ID: &str = "example.com";
    const ORIGIN: &str = "https://example.com";

    fn service() -> PasskeyService {
        let rp = RelyingParty::new(RP_ID, "Example", ORIGIN).unwrap();
        PasskeyService::new(
            Arc::new(MemoryCredentialRegistry::new()),
            Arc::new(ChallengeStore::default()),
            CeremonyVerifier::with_rust_crypto(rp),
        )
    }

    fn decode(challenge: &str) -> Vec<u8> {
        crate::model::base64url_decode(challenge).unwrap()
    }

    #[test]
    fn test_validate_handle() {
        assert_eq!(validate_handle("  alice ").unwrap(), "alice");
        assert!(validate_handle("   ").is_err());
        assert!(validate_handle(&anonymous_binding_key(&[0u8; 32])).is_err());
    }

    #[tokio::test]
    async fn test_registration_options_shape() {
        let service = service();
        let options = service.start_registration("alice", "").await.unwrap();

        assert_eq!(decode(&options.challenge).len(), 32);
        assert_eq!(options.rp.id, RP_ID);
        assert_eq!(options.user.name, "alice");
        assert_eq!(options.user.display_name, "alice");
        assert_eq!(options.timeout, DEFAULT_CEREMONY_TIMEOUT_MS);
        assert_eq!(options.attestation, "none");

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["pubKeyCredParams"][0]["alg"], -7);
        assert_eq!(json["pubKeyCredParams"][1]["alg"], -257);
        assert_eq!(json["pubKeyCredParams"][0]["type"], "public-key");
        assert!(json["user"]["displayName"].is_string());
    }

    #[tokio::test]
    async fn test_finish_registration_without_start() {
        let service = service();
        let authenticator = SoftAuthenticator::new(RP_ID, ORIGIN);
        let response = authenticator.register(&[0u8; 32]);

        let err = service
            .finish_registration(
                "alice",
                authenticator.credential_id(),
                &response.client_data_json,
                &response.attestation_object,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_finish_still_consumes_challenge() {
        let service = service();
        let options = service.start_registration("alice", "Alice").await.unwrap();
        let authenticator = SoftAuthenticator::new(RP_ID, ORIGIN);

        let wrong = authenticator.register(&[0u8; 32]);
        let err = service
            .finish_registration(
                "alice",
                authenticator.credential_id(),
                &wrong.client_data_json,
                &wrong.attestation_object,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::VerificationFailed { .. }));

        let right = authenticator.register(&decode(&options.challenge));
        let err = service
            .finish_registration(
                "alice",
                authenticator.credential_id(),
                &right.client_data_json,
                &right.attestation_object,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_identity_cannot_start_named_authentication() {
        let service = service();
        let err = service.start_authentication(Some("nobody")).await.unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound(_)));
    }
}
