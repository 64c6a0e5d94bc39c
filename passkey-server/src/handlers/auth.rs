//! Passkey ceremony handlers
//!
//! Binary fields cross the wire as unpadded base64url strings, matching the
//! shape browsers produce from `navigator.credentials.create()` / `.get()`
//! after the usual ArrayBuffer encoding.

use axum::{body::Bytes, extract::State, Json};
use passkey_core::model::base64url_decode;
use passkey_core::{AuthenticationOptions, CredentialId, RegistrationOptions};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

const PUBLIC_KEY_TYPE: &str = "public-key";

/// Body of `POST /api/auth/register/start`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRegistrationRequest {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Body of `POST /api/auth/authenticate/start`; absent or blank username
/// requests a discoverable-credential flow.
#[derive(Debug, Default, Deserialize)]
pub struct StartAuthenticationRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub attestation_object: String,
}

/// Body of `POST /api/auth/register/finish`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRegistrationRequest {
    pub username: String,
    pub id: String,
    #[serde(default)]
    pub raw_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    pub response: AttestationResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
    /// Accepted but not trusted; the owner comes from the registry
    #[serde(default)]
    pub user_handle: Option<String>,
}

/// Body of `POST /api/auth/authenticate/finish`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishAuthenticationRequest {
    pub id: String,
    #[serde(default)]
    pub raw_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    pub response: AssertionResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRegistrationResponse {
    pub success: bool,
    pub message: &'static str,
    pub credential_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishAuthenticationResponse {
    pub success: bool,
    pub message: &'static str,
    pub user_id: String,
    pub username: String,
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, ApiError> {
    base64url_decode(value)
        .ok_or_else(|| ApiError::bad_request(format!("{field} is not valid base64url")))
}

/// Validate `id` / `rawId` / `type` and decode the credential id.
fn parse_credential_id(
    id: &str,
    raw_id: Option<&str>,
    kind: Option<&str>,
) -> Result<CredentialId, ApiError> {
    if let Some(kind) = kind {
        if kind != PUBLIC_KEY_TYPE {
            return Err(ApiError::bad_request(format!(
                "unsupported credential type {kind:?}"
            )));
        }
    }
    if let Some(raw_id) = raw_id {
        if raw_id.trim_end_matches('=') != id.trim_end_matches('=') {
            return Err(ApiError::bad_request("rawId does not match id"));
        }
    }
    CredentialId::from_base64url(id)
        .ok_or_else(|| ApiError::bad_request("id is not a valid base64url credential id"))
}

/// POST /api/auth/register/start
///
/// Issues a registration challenge, creating the identity on first use.
pub async fn start_registration(
    State(state): State<AppState>,
    Json(req): Json<StartRegistrationRequest>,
) -> Result<Json<RegistrationOptions>, ApiError> {
    let display_name = req.display_name.as_deref().unwrap_or_default();
    let options = state
        .service
        .start_registration(&req.username, display_name)
        .await?;
    Ok(Json(options))
}

/// POST /api/auth/register/finish
pub async fn finish_registration(
    State(state): State<AppState>,
    Json(req): Json<FinishRegistrationRequest>,
) -> Result<Json<FinishRegistrationResponse>, ApiError> {
    let credential_id =
        parse_credential_id(&req.id, req.raw_id.as_deref(), req.kind.as_deref())?;
    let client_data_json = decode_field(&req.response.client_data_json, "clientDataJSON")?;
    let attestation_object = decode_field(&req.response.attestation_object, "attestationObject")?;

    let credential = state
        .service
        .finish_registration(
            &req.username,
            &credential_id,
            &client_data_json,
            &attestation_object,
        )
        .await?;

    Ok(Json(FinishRegistrationResponse {
        success: true,
        message: "Passkey registered",
        credential_id: credential.credential_id.to_base64url(),
    }))
}

/// POST /api/auth/authenticate/start
///
/// The body is optional: an empty body behaves like `{}`.
pub async fn start_authentication(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AuthenticationOptions>, ApiError> {
    let req: StartAuthenticationRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartAuthenticationRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?
    };

    let handle = req
        .username
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty());
    let options = state.service.start_authentication(handle).await?;
    Ok(Json(options))
}

/// POST /api/auth/authenticate/finish
pub async fn finish_authentication(
    State(state): State<AppState>,
    Json(req): Json<FinishAuthenticationRequest>,
) -> Result<Json<FinishAuthenticationResponse>, ApiError> {
    let credential_id =
        parse_credential_id(&req.id, req.raw_id.as_deref(), req.kind.as_deref())?;
    let client_data_json = decode_field(&req.response.client_data_json, "clientDataJSON")?;
    let authenticator_data =
        decode_field(&req.response.authenticator_data, "authenticatorData")?;
    let signature = decode_field(&req.response.signature, "signature")?;

    let identity = state
        .service
        .finish_authentication(
            &credential_id,
            &client_data_json,
            &authenticator_data,
            &signature,
        )
        .await?;

    Ok(Json(FinishAuthenticationResponse {
        success: true,
        message: "Authentication successful",
        user_id: identity.id.to_string(),
        username: identity.handle,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_id_rejects_wrong_type() {
        let err = parse_credential_id("AQID", None, Some("password")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_credential_id_rejects_raw_id_mismatch() {
        let err = parse_credential_id("AQID", Some("BAUG"), Some("public-key")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_credential_id_decodes_base64url() {
        let id = parse_credential_id("AQID", Some("AQID"), None).unwrap();
        assert_eq!(id.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_finish_registration_request_shape() {
        let json = r#"{
            "username": "alice",
            "id": "AQID",
            "rawId": "AQID",
            "type": "public-key",
            "response": {"clientDataJSON": "e30", "attestationObject": "oA"}
        }"#;
        let req: FinishRegistrationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.username, "alice");
        assert_eq!(req.kind.as_deref(), Some("public-key"));
        assert_eq!(req.response.client_data_json, "e30");
    }
}
