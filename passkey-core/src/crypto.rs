//! Cryptography provider used by the ceremony verifier
//!
//! The verifier never touches hashing, signature primitives or binary decoding
//! directly; it goes through [`CryptoProvider`], which keeps it a pure
//! function of its inputs and lets tests substitute the primitives.

use sha2::{Digest, Sha256};

use crate::codec::{
    AttestationObject, AuthenticatorData, ClientData, CodecError, DecodedPublicKey, KeyParams,
};
use crate::model::CoseAlgorithm;

/// COSE curve identifier for P-256
pub const COSE_CURVE_P256: i64 = 1;

pub trait CryptoProvider: Send + Sync {
    /// SHA-256 digest
    fn sha256(&self, data: &[u8]) -> [u8; 32];

    /// Verify `signature` over `message` with `key` using `algorithm`.
    ///
    /// Returns `false` for any malformed key or signature.
    fn verify_signature(
        &self,
        algorithm: CoseAlgorithm,
        key: &DecodedPublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> bool;

    fn decode_client_data(&self, raw: &[u8]) -> Result<ClientData, CodecError> {
        ClientData::parse(raw)
    }

    fn decode_authenticator_data(&self, raw: &[u8]) -> Result<AuthenticatorData, CodecError> {
        AuthenticatorData::parse(raw)
    }

    fn decode_attestation_object(&self, raw: &[u8]) -> Result<AttestationObject, CodecError> {
        AttestationObject::parse(raw)
    }

    fn decode_public_key(&self, cose_key: &[u8]) -> Result<DecodedPublicKey, CodecError> {
        DecodedPublicKey::parse(cose_key)
    }
}

/// Whether a decoded key has the shape its declared algorithm requires.
pub fn key_matches_algorithm(algorithm: CoseAlgorithm, key: &DecodedPublicKey) -> bool {
    if key.alg != algorithm.cose_id() {
        return false;
    }
    match (algorithm, &key.params) {
        (CoseAlgorithm::Es256, KeyParams::Ec2 { curve, x, y }) => {
            *curve == COSE_CURVE_P256 && x.len() == 32 && y.len() == 32
        }
        (CoseAlgorithm::Rs256, KeyParams::Rsa { n, e }) => !n.is_empty() && !e.is_empty(),
        _ => false,
    }
}

/// [`CryptoProvider`] backed by the RustCrypto `sha2`, `p256` and `rsa` crates
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    fn verify_es256(x: &[u8], y: &[u8], message: &[u8], signature: &[u8]) -> bool {
        use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};

        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(x);
        sec1.extend_from_slice(y);

        let Ok(key) = VerifyingKey::from_sec1_bytes(&sec1) else {
            return false;
        };
        let Ok(signature) = Signature::from_der(signature) else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }

    fn verify_rs256(n: &[u8], e: &[u8], message: &[u8], signature: &[u8]) -> bool {
        use rsa::pkcs1v15::{Signature, VerifyingKey};
        use rsa::signature::Verifier;
        use rsa::{BigUint, RsaPublicKey};

        let Ok(key) = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
        else {
            return false;
        };
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(key)
            .verify(message, &signature)
            .is_ok()
    }
}

impl CryptoProvider for RustCryptoProvider {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn verify_signature(
        &self,
        algorithm: CoseAlgorithm,
        key: &DecodedPublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> bool {
        if !key_matches_algorithm(algorithm, key) {
            return false;
        }
        match &key.params {
            KeyParams::Ec2 { x, y, .. } => Self::verify_es256(x, y, message, signature),
            KeyParams::Rsa { n, e } => Self::verify_rs256(n, e, message, signature),
            KeyParams::Other { .. } => false,
        }
    }
}
