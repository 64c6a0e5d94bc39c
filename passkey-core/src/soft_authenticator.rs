//! Software P-256 authenticator
//!
//! Produces genuine attestation objects and assertions so ceremonies can be
//! exercised end to end without a browser or hardware token. Not meant for
//! production credentials: the private key only lives in memory.

use ciborium::value::Value;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use rand::{rngs::OsRng, RngCore};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::codec::{FLAG_AT, FLAG_UP};
use crate::model::{base64url_encode, CredentialId};
use crate::verifier::{CEREMONY_CREATE, CEREMONY_GET};

/// AAGUID reported in packed attestation
pub const AAGUID: [u8; 16] = *b"passkey-soft-aut";

/// Registration response as a browser would send it
#[derive(Debug, Clone)]
pub struct RegistrationResponse {
    pub client_data_json: Vec<u8>,
    pub attestation_object: Vec<u8>,
}

/// Assertion response as a browser would send it
#[derive(Debug, Clone)]
pub struct AssertionResponse {
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    /// DER-encoded ECDSA signature
    pub signature: Vec<u8>,
}

pub struct SoftAuthenticator {
    rp_id: String,
    origin: String,
    credential_id: CredentialId,
    signing_key: SigningKey,
}

impl SoftAuthenticator {
    /// New authenticator holding one fresh credential for `rp_id`, answering as `origin`.
    pub fn new(rp_id: impl Into<String>, origin: impl Into<String>) -> Self {
        let mut id = [0u8; 16];
        OsRng.fill_bytes(&mut id);
        Self {
            rp_id: rp_id.into(),
            origin: origin.into(),
            credential_id: CredentialId::new(id.to_vec()),
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn credential_id(&self) -> &CredentialId {
        &self.credential_id
    }

    /// `clientDataJSON` for `ceremony_type` echoing `challenge`
    pub fn client_data(&self, ceremony_type: &str, challenge: &[u8]) -> Vec<u8> {
        json!({
            "type": ceremony_type,
            "challenge": base64url_encode(challenge),
            "origin": self.origin,
            "crossOrigin": false,
        })
        .to_string()
        .into_bytes()
    }

    /// COSE_Key of the credential (EC2, ES256, P-256)
    pub fn cose_key(&self) -> Vec<u8> {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let coordinate = |c: Option<&p256::FieldBytes>| c.map(|b| b.to_vec()).unwrap_or_default();
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer(3.into()), Value::Integer((-7).into())),
            (Value::Integer((-1).into()), Value::Integer(1.into())),
            (Value::Integer((-2).into()), Value::Bytes(coordinate(point.x()))),
            (Value::Integer((-3).into()), Value::Bytes(coordinate(point.y()))),
        ]);
        encode(&map)
    }

    /// Create the credential with `none` attestation.
    pub fn register(&self, challenge: &[u8]) -> RegistrationResponse {
        let client_data_json = self.client_data(CEREMONY_CREATE, challenge);
        let auth_data = self.registration_auth_data([0u8; 16]);
        let attestation_object =
            attestation_object("none", Value::Map(Vec::new()), auth_data);
        RegistrationResponse {
            client_data_json,
            attestation_object,
        }
    }

    /// Create the credential with `packed` self attestation.
    pub fn register_packed_self(&self, challenge: &[u8]) -> RegistrationResponse {
        let client_data_json = self.client_data(CEREMONY_CREATE, challenge);
        let auth_data = self.registration_auth_data(AAGUID);
        let signature = self.sign(&auth_data, &client_data_json);
        let statement = Value::Map(vec![
            (Value::Text("alg".into()), Value::Integer((-7).into())),
            (Value::Text("sig".into()), Value::Bytes(signature)),
        ]);
        let attestation_object = attestation_object("packed", statement, auth_data);
        RegistrationResponse {
            client_data_json,
            attestation_object,
        }
    }

    /// Sign an assertion reporting `sign_count`, with the user-present flag set.
    pub fn assert(&self, challenge: &[u8], sign_count: u32) -> AssertionResponse {
        self.assert_with_flags(challenge, sign_count, FLAG_UP)
    }

    pub fn assert_with_flags(&self, challenge: &[u8], sign_count: u32, flags: u8) -> AssertionResponse {
        let client_data_json = self.client_data(CEREMONY_GET, challenge);
        let mut authenticator_data = self.rp_id_hash().to_vec();
        authenticator_data.push(flags);
        authenticator_data.extend_from_slice(&sign_count.to_be_bytes());
        let signature = self.sign(&authenticator_data, &client_data_json);
        AssertionResponse {
            client_data_json,
            authenticator_data,
            signature,
        }
    }

    fn rp_id_hash(&self) -> [u8; 32] {
        Sha256::digest(self.rp_id.as_bytes()).into()
    }

    fn registration_auth_data(&self, aaguid: [u8; 16]) -> Vec<u8> {
        let id = self.credential_id.as_bytes();
        let mut data = self.rp_id_hash().to_vec();
        data.push(FLAG_UP | FLAG_AT);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&aaguid);
        data.extend_from_slice(&(id.len() as u16).to_be_bytes());
        data.extend_from_slice(id);
        data.extend_from_slice(&self.cose_key());
        data
    }

    fn sign(&self, authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
        let mut payload = authenticator_data.to_vec();
        payload.extend_from_slice(&Sha256::digest(client_data_json));
        let signature: Signature = self.signing_key.sign(&payload);
        signature.to_der().as_bytes().to_vec()
    }
}

impl std::fmt::Debug for SoftAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftAuthenticator")
            .field("rp_id", &self.rp_id)
            .field("origin", &self.origin)
            .field("credential_id", &self.credential_id)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

fn attestation_object(fmt: &str, statement: Value, auth_data: Vec<u8>) -> Vec<u8> {
    encode(&Value::Map(vec![
        (Value::Text("fmt".into()), Value::Text(fmt.into())),
        (Value::Text("attStmt".into()), statement),
        (Value::Text("authData".into()), Value::Bytes(auth_data)),
    ]))
}

fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).expect("CBOR encoding into a Vec is infallible");
    buf
}
