//! Registration and authentication verification pipelines
//!
//! [`CeremonyVerifier`] holds only the relying-party configuration and a
//! [`CryptoProvider`]; every check is a function of the inputs passed in, so the
//! same inputs always yield the same verdict. Persistence is the caller's job.
//!
//! Every rejection is reported as [`CeremonyError::VerificationFailed`] with
//! the failing sub-check attached for server-side logging only. The one
//! exception is a non-advancing signature counter, which surfaces as
//! [`CeremonyError::ReplayDetected`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use crate::codec::{cbor_int, map_get, AuthenticatorData, ClientData};
use crate::crypto::{key_matches_algorithm, CryptoProvider, RustCryptoProvider};
use crate::error::{CeremonyError, Result, VerificationFailure};
use crate::model::{
    AttestationFormat, CoseAlgorithm, Credential, CredentialId, CredentialPublicKey, Identity,
};

/// `clientDataJSON.type` for registration
pub const CEREMONY_CREATE: &str = "webauthn.create";
/// `clientDataJSON.type` for authentication
pub const CEREMONY_GET: &str = "webauthn.get";

/// Apply the signature-counter rule.
///
/// A counter of zero on both sides means the authenticator does not count and is
/// accepted; otherwise the presented counter must be strictly greater.
pub fn check_sign_count(stored: u32, presented: u32) -> Result<()> {
    if presented > stored || (stored == 0 && presented == 0) {
        Ok(())
    } else {
        Err(CeremonyError::ReplayDetected { stored, presented })
    }
}

/// Relying-party identity the ceremonies are bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    /// Effective domain, e.g. `example.com`
    pub id: String,
    pub name: String,
    /// ASCII serialization of the origin, e.g. `https://example.com:8443`
    pub origin: String,
}

impl RelyingParty {
    /// Validate and normalise the relying-party settings.
    ///
    /// `origin` must be an absolute http(s) origin without path, query or fragment.
    pub fn new(id: &str, name: &str, origin: &str) -> Result<Self> {
        if id.trim().is_empty() {
            return Err(CeremonyError::InvalidInput("relying party id is empty".into()));
        }

        let url = Url::parse(origin)
            .map_err(|e| CeremonyError::InvalidInput(format!("invalid origin {origin:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(CeremonyError::InvalidInput(format!(
                "origin must be an http(s) URL: {origin}"
            )));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(CeremonyError::InvalidInput(format!(
                "origin must not carry a path, query or fragment: {origin}"
            )));
        }

        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            origin: url.origin().ascii_serialization(),
        })
    }
}

/// Inputs to [`CeremonyVerifier::verify_registration`]
#[derive(Debug, Clone, Copy)]
pub struct RegistrationInput<'a> {
    pub identity: &'a Identity,
    /// Challenge consumed for this identity
    pub challenge: &'a [u8],
    /// Credential id as claimed by the client
    pub credential_id: &'a CredentialId,
    pub client_data_json: &'a [u8],
    pub attestation_object: &'a [u8],
    pub now: DateTime<Utc>,
}

/// Inputs to [`CeremonyVerifier::verify_authentication`]
#[derive(Debug, Clone, Copy)]
pub struct AuthenticationInput<'a> {
    /// Stored credential, including the prior counter
    pub credential: &'a Credential,
    pub challenge: &'a [u8],
    pub client_data_json: &'a [u8],
    pub authenticator_data: &'a [u8],
    pub signature: &'a [u8],
    pub now: DateTime<Utc>,
}

/// Result of a successful assertion, to be persisted with `update_counter`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationOutcome {
    pub new_counter: u32,
    pub used_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CeremonyVerifier {
    relying_party: RelyingParty,
    rp_id_hash: [u8; 32],
    crypto: Arc<dyn CryptoProvider>,
}

impl CeremonyVerifier {
    pub fn new(relying_party: RelyingParty, crypto: Arc<dyn CryptoProvider>) -> Self {
        let rp_id_hash = crypto.sha256(relying_party.id.as_bytes());
        Self {
            relying_party,
            rp_id_hash,
            crypto,
        }
    }

    /// Verifier using [`RustCryptoProvider`]
    pub fn with_rust_crypto(relying_party: RelyingParty) -> Self {
        Self::new(relying_party, Arc::new(RustCryptoProvider))
    }

    pub fn relying_party(&self) -> &RelyingParty {
        &self.relying_party
    }

    /// Decode the challenge echoed in `client_data_json` without checking it.
    ///
    /// Used to locate the binding key of a discoverable-credential ceremony.
    pub fn echoed_challenge(&self, client_data_json: &[u8]) -> Result<Vec<u8>> {
        self.crypto
            .decode_client_data(client_data_json)
            .map(|client| client.challenge)
            .map_err(|e| {
                tracing::debug!(error = %e, "Undecodable client data");
                reject("authentication", VerificationFailure::Malformed)
            })
    }

    /// Verify a registration response and build the credential to store.
    pub fn verify_registration(&self, input: RegistrationInput<'_>) -> Result<Credential> {
        const CEREMONY: &str = "registration";
        let fail = |reason| reject(CEREMONY, reason);

        let client = self.decode_client(CEREMONY, input.client_data_json)?;
        self.check_client_data(&client, CEREMONY_CREATE, input.challenge)
            .map_err(fail)?;

        let attestation = self
            .crypto
            .decode_attestation_object(input.attestation_object)
            .map_err(|e| {
                tracing::debug!(error = %e, "Undecodable attestation object");
                fail(VerificationFailure::Malformed)
            })?;
        self.check_authenticator_data(&attestation.auth_data)
            .map_err(fail)?;

        let attested = attestation
            .auth_data
            .attested
            .as_ref()
            .ok_or_else(|| fail(VerificationFailure::MissingCredentialData))?;
        if attested.credential_id != input.credential_id.as_bytes() {
            return Err(fail(VerificationFailure::CredentialIdMismatch));
        }

        let key = self
            .crypto
            .decode_public_key(&attested.cose_key)
            .map_err(|_| fail(VerificationFailure::Malformed))?;
        let algorithm = CoseAlgorithm::from_cose(key.alg)
            .ok_or_else(|| fail(VerificationFailure::UnsupportedAlgorithm))?;
        if !key_matches_algorithm(algorithm, &key) {
            return Err(fail(VerificationFailure::KeyMismatch));
        }

        let format = AttestationFormat::from_fmt(&attestation.fmt)
            .ok_or_else(|| fail(VerificationFailure::Attestation))?;
        if format == AttestationFormat::Packed && map_get(&attestation.att_stmt, "x5c").is_none() {
            // Self attestation: signed with the credential key itself
            let alg = map_get(&attestation.att_stmt, "alg").and_then(cbor_int);
            let sig = map_get(&attestation.att_stmt, "sig").and_then(|v| v.as_bytes());
            let (Some(alg), Some(sig)) = (alg, sig) else {
                return Err(fail(VerificationFailure::Attestation));
            };
            let signed = self.signed_payload(&attestation.auth_data_raw, input.client_data_json);
            if alg != algorithm.cose_id()
                || !self.crypto.verify_signature(algorithm, &key, &signed, sig)
            {
                return Err(fail(VerificationFailure::Attestation));
            }
        }

        let aaguid = Uuid::from_bytes(attested.aaguid);
        Ok(Credential {
            credential_id: input.credential_id.clone(),
            identity_id: input.identity.id,
            public_key: CredentialPublicKey {
                algorithm,
                cose_key: attested.cose_key.clone(),
            },
            sign_count: attestation.auth_data.sign_count,
            aaguid: (!aaguid.is_nil()).then_some(aaguid),
            attestation_format: format,
            created_at: input.now,
            last_used_at: None,
        })
    }

    /// Verify an assertion against a stored credential.
    pub fn verify_authentication(
        &self,
        input: AuthenticationInput<'_>,
    ) -> Result<AuthenticationOutcome> {
        const CEREMONY: &str = "authentication";
        let fail = |reason| reject(CEREMONY, reason);

        let client = self.decode_client(CEREMONY, input.client_data_json)?;
        self.check_client_data(&client, CEREMONY_GET, input.challenge)
            .map_err(fail)?;

        let auth_data = self
            .crypto
            .decode_authenticator_data(input.authenticator_data)
            .map_err(|e| {
                tracing::debug!(error = %e, "Undecodable authenticator data");
                fail(VerificationFailure::Malformed)
            })?;
        self.check_authenticator_data(&auth_data).map_err(fail)?;

        let stored = &input.credential.public_key;
        let key = self
            .crypto
            .decode_public_key(&stored.cose_key)
            .map_err(|_| fail(VerificationFailure::Malformed))?;
        let signed = self.signed_payload(input.authenticator_data, input.client_data_json);
        if !self
            .crypto
            .verify_signature(stored.algorithm, &key, &signed, input.signature)
        {
            return Err(fail(VerificationFailure::Signature));
        }

        check_sign_count(input.credential.sign_count, auth_data.sign_count).inspect_err(|_| {
            tracing::warn!(
                credential_id = %input.credential.credential_id,
                stored = input.credential.sign_count,
                presented = auth_data.sign_count,
                "Signature counter did not advance, possible cloned authenticator"
            );
        })?;

        Ok(AuthenticationOutcome {
            new_counter: auth_data.sign_count,
            used_at: input.now,
        })
    }

    fn decode_client(&self, ceremony: &'static str, raw: &[u8]) -> Result<ClientData> {
        self.crypto.decode_client_data(raw).map_err(|e| {
            tracing::debug!(error = %e, "Undecodable client data");
            reject(ceremony, VerificationFailure::Malformed)
        })
    }

    fn check_client_data(
        &self,
        client: &ClientData,
        expected_type: &str,
        expected_challenge: &[u8],
    ) -> std::result::Result<(), VerificationFailure> {
        if client.ceremony_type != expected_type {
            return Err(VerificationFailure::CeremonyType);
        }
        if client.challenge != expected_challenge {
            return Err(VerificationFailure::Challenge);
        }
        if client.origin != self.relying_party.origin {
            return Err(VerificationFailure::Origin);
        }
        Ok(())
    }

    fn check_authenticator_data(
        &self,
        auth_data: &AuthenticatorData,
    ) -> std::result::Result<(), VerificationFailure> {
        if auth_data.rp_id_hash != self.rp_id_hash {
            return Err(VerificationFailure::RelyingPartyId);
        }
        if !auth_data.user_present() {
            return Err(VerificationFailure::UserPresence);
        }
        Ok(())
    }

    /// `authenticatorData || SHA-256(clientDataJSON)`
    fn signed_payload(&self, authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
        let client_hash = self.crypto.sha256(client_data_json);
        let mut payload = Vec::with_capacity(authenticator_data.len() + client_hash.len());
        payload.extend_from_slice(authenticator_data);
        payload.extend_from_slice(&client_hash);
        payload
    }
}

impl std::fmt::Debug for CeremonyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CeremonyVerifier")
            .field("relying_party", &self.relying_party)
            .finish_non_exhaustive()
    }
}

fn reject(ceremony: &'static str, reason: VerificationFailure) -> CeremonyError {
    tracing::warn!(ceremony, reason = %reason, "Ceremony verification failed");
    CeremonyError::verification(reason)
}
