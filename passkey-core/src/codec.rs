//! Decoding of the binary and JSON structures exchanged during a ceremony.
//!
//! authenticatorData layout:
//!
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4, BE)
//!   [ aaguid (16) | credIdLen (2, BE) | credId | COSE_Key ]   when AT is set
//!   [ extensions (CBOR) ]                                     when ED is set
//! ```

use ciborium::value::Value;
use serde::Deserialize;
use std::io::Cursor;
use thiserror::Error;

use crate::model::base64url_decode;

/// User present
pub const FLAG_UP: u8 = 0x01;
/// User verified
pub const FLAG_UV: u8 = 0x04;
/// Attested credential data included
pub const FLAG_AT: u8 = 0x40;
/// Extension data included
pub const FLAG_ED: u8 = 0x80;

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const AAGUID_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid client data JSON: {0}")]
    ClientDataJson(#[from] serde_json::Error),

    #[error("Invalid base64url in {0}")]
    Base64(&'static str),

    #[error("Truncated {what}: need {needed} bytes, have {actual}")]
    Truncated {
        what: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("Invalid CBOR: {0}")]
    Cbor(String),

    #[error("Missing or invalid field: {0}")]
    Field(&'static str),
}

/// Decoded `clientDataJSON`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientData {
    /// `webauthn.create` or `webauthn.get`
    pub ceremony_type: String,
    /// Echoed challenge, base64url-decoded
    pub challenge: Vec<u8>,
    pub origin: String,
    pub cross_origin: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClientData {
    #[serde(rename = "type")]
    ceremony_type: String,
    challenge: String,
    origin: String,
    #[serde(default)]
    cross_origin: bool,
}

impl ClientData {
    pub fn parse(raw: &[u8]) -> Result<Self, CodecError> {
        let parsed: RawClientData = serde_json::from_slice(raw)?;
        let challenge =
            base64url_decode(&parsed.challenge).ok_or(CodecError::Base64("challenge"))?;
        Ok(Self {
            ceremony_type: parsed.ceremony_type,
            challenge,
            origin: parsed.origin,
            cross_origin: parsed.cross_origin,
        })
    }
}

/// Credential data present in registration authenticator data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
    /// COSE_Key bytes exactly as they appear in authenticator data
    pub cose_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: u8,
    pub sign_count: u32,
    pub attested: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    pub fn parse(raw: &[u8]) -> Result<Self, CodecError> {
        ensure_len("authenticator data", raw, HEADER_LEN)?;

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&raw[..RP_ID_HASH_LEN]);
        let flags = raw[RP_ID_HASH_LEN];
        let sign_count = u32::from_be_bytes([raw[33], raw[34], raw[35], raw[36]]);

        let attested = if flags & FLAG_AT != 0 {
            Some(parse_attested(&raw[HEADER_LEN..])?)
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested,
        })
    }

    pub fn user_present(&self) -> bool {
        self.flags & FLAG_UP != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_UV != 0
    }
}

fn ensure_len(what: &'static str, bytes: &[u8], needed: usize) -> Result<(), CodecError> {
    if bytes.len() < needed {
        return Err(CodecError::Truncated {
            what,
            needed,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn parse_attested(rest: &[u8]) -> Result<AttestedCredentialData, CodecError> {
    ensure_len("attested credential data", rest, AAGUID_LEN + 2)?;

    let mut aaguid = [0u8; AAGUID_LEN];
    aaguid.copy_from_slice(&rest[..AAGUID_LEN]);
    let id_len = u16::from_be_bytes([rest[AAGUID_LEN], rest[AAGUID_LEN + 1]]) as usize;

    let id_start = AAGUID_LEN + 2;
    ensure_len("credential id", rest, id_start + id_len)?;
    let credential_id = rest[id_start..id_start + id_len].to_vec();

    // The COSE key is followed directly by optional extensions, so its length is
    // only known after decoding one CBOR item.
    let key_bytes = &rest[id_start + id_len..];
    let mut cursor = Cursor::new(key_bytes);
    let _: Value = ciborium::from_reader(&mut cursor)
        .map_err(|e| CodecError::Cbor(format!("credential public key: {e}")))?;
    let key_len = cursor.position() as usize;

    Ok(AttestedCredentialData {
        aaguid,
        credential_id,
        cose_key: key_bytes[..key_len].to_vec(),
    })
}

/// Decoded attestation object (`{fmt, attStmt, authData}`)
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub fmt: String,
    pub att_stmt: Value,
    /// Raw authenticator data, needed again for attestation signatures
    pub auth_data_raw: Vec<u8>,
    pub auth_data: AuthenticatorData,
}

impl AttestationObject {
    pub fn parse(raw: &[u8]) -> Result<Self, CodecError> {
        let value: Value =
            ciborium::from_reader(raw).map_err(|e| CodecError::Cbor(e.to_string()))?;
        let Value::Map(entries) = value else {
            return Err(CodecError::Field("attestation object"));
        };

        let mut fmt = None;
        let mut att_stmt = None;
        let mut auth_data_raw = None;
        for (key, value) in entries {
            match (key.as_text(), value) {
                (Some("fmt"), Value::Text(text)) => fmt = Some(text),
                (Some("attStmt"), stmt @ Value::Map(_)) => att_stmt = Some(stmt),
                (Some("authData"), Value::Bytes(bytes)) => auth_data_raw = Some(bytes),
                _ => {}
            }
        }

        let fmt = fmt.ok_or(CodecError::Field("fmt"))?;
        let att_stmt = att_stmt.ok_or(CodecError::Field("attStmt"))?;
        let auth_data_raw = auth_data_raw.ok_or(CodecError::Field("authData"))?;
        let auth_data = AuthenticatorData::parse(&auth_data_raw)?;

        Ok(Self {
            fmt,
            att_stmt,
            auth_data_raw,
            auth_data,
        })
    }
}

/// Look up a text key in a CBOR map.
pub fn map_get<'a>(map: &'a Value, key: &str) -> Option<&'a Value> {
    map.as_map()?
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// Public key parameters by COSE key type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParams {
    /// kty 2
    Ec2 { curve: i64, x: Vec<u8>, y: Vec<u8> },
    /// kty 3
    Rsa { n: Vec<u8>, e: Vec<u8> },
    /// Any other key type; kept so the algorithm can be reported as unsupported
    Other { kty: i64 },
}

/// A COSE_Key decoded far enough to verify signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPublicKey {
    pub alg: i64,
    pub params: KeyParams,
}

impl DecodedPublicKey {
    pub fn parse(cose_key: &[u8]) -> Result<Self, CodecError> {
        let value: Value =
            ciborium::from_reader(cose_key).map_err(|e| CodecError::Cbor(e.to_string()))?;
        let entries = value.as_map().ok_or(CodecError::Field("COSE key"))?;

        let int_field = |label: i64, name: &'static str| {
            cose_get(entries, label)
                .and_then(cbor_int)
                .ok_or(CodecError::Field(name))
        };
        let bytes_field = |label: i64, name: &'static str| {
            cose_get(entries, label)
                .and_then(Value::as_bytes)
                .cloned()
                .ok_or(CodecError::Field(name))
        };

        let kty = int_field(1, "kty")?;
        let alg = int_field(3, "alg")?;
        let params = match kty {
            2 => KeyParams::Ec2 {
                curve: int_field(-1, "crv")?,
                x: bytes_field(-2, "x")?,
                y: bytes_field(-3, "y")?,
            },
            3 => KeyParams::Rsa {
                n: bytes_field(-1, "n")?,
                e: bytes_field(-2, "e")?,
            },
            other => KeyParams::Other { kty: other },
        };

        Ok(Self { alg, params })
    }
}

fn cose_get(entries: &[(Value, Value)], label: i64) -> Option<&Value> {
    entries
        .iter()
        .find(|(k, _)| cbor_int(k) == Some(label))
        .map(|(_, v)| v)
}

/// Read a CBOR integer that fits in an `i64`.
pub fn cbor_int(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => i64::try_from(i128::from(*i)).ok(),
        _ => None,
    }
}
