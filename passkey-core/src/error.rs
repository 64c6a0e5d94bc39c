use thiserror::Error;

/// Which verification sub-check rejected a ceremony response.
///
/// Only ever logged server-side. `CeremonyError::VerificationFailed` renders the
/// same text for every reason so clients cannot use it as an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    /// Client data, authenticator data or attestation could not be decoded
    Malformed,
    /// Client data `type` is not the expected ceremony marker
    CeremonyType,
    /// Echoed challenge does not match the issued one
    Challenge,
    /// Client data origin is not the relying-party origin
    Origin,
    /// Authenticator data was produced for a different relying-party id
    RelyingPartyId,
    /// User-presence flag not set
    UserPresence,
    /// Registration response carries no attested credential data
    MissingCredentialData,
    /// Credential id in the request differs from the attested one
    CredentialIdMismatch,
    /// Public key algorithm is not on the allow-list
    UnsupportedAlgorithm,
    /// Public key parameters do not match the declared algorithm
    KeyMismatch,
    /// Attestation statement failed the trust policy
    Attestation,
    /// Signature did not verify
    Signature,
}

impl VerificationFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::CeremonyType => "ceremony_type",
            Self::Challenge => "challenge",
            Self::Origin => "origin",
            Self::RelyingPartyId => "rp_id",
            Self::UserPresence => "user_presence",
            Self::MissingCredentialData => "missing_credential_data",
            Self::CredentialIdMismatch => "credential_id_mismatch",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::KeyMismatch => "key_mismatch",
            Self::Attestation => "attestation",
            Self::Signature => "signature",
        }
    }
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a CAPTCHA check ended in a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaFailure {
    /// Neither a v3 nor a v2 token was supplied
    MissingToken,
    /// The verification service reported the token as invalid
    Rejected,
}

impl std::fmt::Display for CaptchaFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => f.write_str("CAPTCHA token is required"),
            Self::Rejected => f.write_str("CAPTCHA verification failed"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CeremonyError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Challenge expired")]
    Expired,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Verification failed")]
    VerificationFailed { reason: VerificationFailure },

    #[error("Signature counter did not advance: stored={stored}, presented={presented}")]
    ReplayDetected { stored: u32, presented: u32 },

    #[error("Stronger CAPTCHA challenge required")]
    CaptchaRequireEscalation,

    #[error("{0}")]
    CaptchaFailed(CaptchaFailure),

    #[error("Upstream service unavailable: {0}")]
    Transient(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Challenge store at capacity")]
    CapacityExceeded,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CeremonyError {
    pub fn verification(reason: VerificationFailure) -> Self {
        Self::VerificationFailed { reason }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

pub type Result<T> = std::result::Result<T, CeremonyError>;
