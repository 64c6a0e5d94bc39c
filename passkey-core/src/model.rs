//! Ceremony data model
//!
//! Identities own credentials; credentials carry the public key material and the
//! signature counter used for clone detection.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Encode bytes as unpadded base64url, the encoding used for every binary field
/// exchanged with clients.
pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded base64url. Trailing `=` padding is tolerated.
pub fn base64url_decode(encoded: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()
}

/// An account that passkeys are registered against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque stable id, never shown to users as a name
    pub id: Uuid,
    /// Unique handle (username)
    pub handle: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(handle: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle: handle.into(),
            display_name: display_name.into(),
            created_at: Utc::now(),
        }
    }

    /// The WebAuthn user handle: base64url of the 16 raw id bytes.
    pub fn opaque_handle(&self) -> String {
        base64url_encode(self.id.as_bytes())
    }
}

/// Opaque binary credential identifier, globally unique across identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialId(Vec<u8>);

impl CredentialId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64url(encoded: &str) -> Option<Self> {
        base64url_decode(encoded)
            .filter(|bytes| !bytes.is_empty())
            .map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        base64url_encode(&self.0)
    }
}

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64url())
    }
}

impl AsRef<[u8]> for CredentialId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for CredentialId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> Deserialize<'de> for CredentialId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64url(&encoded)
            .ok_or_else(|| serde::de::Error::custom("invalid base64url credential id"))
    }
}

/// Public key algorithms accepted for new credentials (COSE identifiers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoseAlgorithm {
    /// ECDSA over P-256 with SHA-256
    Es256,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256,
}

impl CoseAlgorithm {
    /// Allow-list, in the preference order advertised to clients.
    pub const ALLOWED: [CoseAlgorithm; 2] = [CoseAlgorithm::Es256, CoseAlgorithm::Rs256];

    pub fn from_cose(id: i64) -> Option<Self> {
        match id {
            -7 => Some(Self::Es256),
            -257 => Some(Self::Rs256),
            _ => None,
        }
    }

    pub fn cose_id(&self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::Rs256 => -257,
        }
    }
}

/// Stored public key: the algorithm plus the COSE_Key bytes exactly as attested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPublicKey {
    pub algorithm: CoseAlgorithm,
    pub cose_key: Vec<u8>,
}

/// WebAuthn attestation statement format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationFormat {
    /// Standard packed format
    Packed,
    /// TPM attestation (Windows)
    Tpm,
    /// Android Key attestation (hardware-backed)
    AndroidKey,
    /// Android SafetyNet (legacy)
    AndroidSafetyNet,
    /// Apple anonymous attestation
    Apple,
    /// FIDO U2F
    FidoU2f,
    /// No attestation statement
    #[default]
    None,
}

impl AttestationFormat {
    /// Parse the `fmt` identifier used inside attestation objects.
    pub fn from_fmt(fmt: &str) -> Option<Self> {
        match fmt {
            "packed" => Some(Self::Packed),
            "tpm" => Some(Self::Tpm),
            "android-key" => Some(Self::AndroidKey),
            "android-safetynet" => Some(Self::AndroidSafetyNet),
            "apple" => Some(Self::Apple),
            "fido-u2f" => Some(Self::FidoU2f),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Packed => "packed",
            Self::Tpm => "tpm",
            Self::AndroidKey => "android_key",
            Self::AndroidSafetyNet => "android_safety_net",
            Self::Apple => "apple",
            Self::FidoU2f => "fido_u2f",
            Self::None => "none",
        }
    }

    /// Inverse of [`AttestationFormat::as_str`]; unknown values read back as `None`.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "packed" => Self::Packed,
            "tpm" => Self::Tpm,
            "android_key" => Self::AndroidKey,
            "android_safety_net" => Self::AndroidSafetyNet,
            "apple" => Self::Apple,
            "fido_u2f" => Self::FidoU2f,
            _ => Self::None,
        }
    }
}

/// A registered public-key credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: CredentialId,
    /// Owning identity
    pub identity_id: Uuid,
    pub public_key: CredentialPublicKey,
    pub sign_count: u32,
    /// Authenticator model (AAGUID); `None` when the authenticator reports zeros
    pub aaguid: Option<Uuid>,
    pub attestation_format: AttestationFormat,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}
