//! Client half of the ceremony: decode server options into the byte buffers
//! the platform credential API wants, run the ceremony, encode the binary
//! result back into wire JSON, and submit it.
//!
//! Byte buffers live only for the duration of one ceremony and are never
//! logged.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::client::base64url;
use crate::error::AuthError;

/// Decoded creation options ready for the platform API.
#[derive(Debug)]
pub struct CreationRequest {
    pub challenge: Vec<u8>,
    pub user_handle: Vec<u8>,
    pub exclude_credential_ids: Vec<Vec<u8>>,
    /// Remaining options passed through untouched (rp, algorithms, timeout).
    pub options: Value,
}

/// Decoded assertion options ready for the platform API.
#[derive(Debug)]
pub struct AssertionRequest {
    pub challenge: Vec<u8>,
    pub allow_credential_ids: Vec<Vec<u8>>,
    pub options: Value,
}

/// Binary attestation produced by the platform.
#[derive(Debug)]
pub struct AttestationResult {
    pub credential_id: Vec<u8>,
    pub client_data: Vec<u8>,
    pub attestation_object: Vec<u8>,
}

/// Binary assertion produced by the platform.
#[derive(Debug)]
pub struct AssertionResult {
    pub credential_id: Vec<u8>,
    pub client_data: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

/// The device's credential API. `Ok(None)` means the user dismissed or did
/// not complete the ceremony, which is not a verification failure.
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    fn is_available(&self) -> bool;

    async fn create_credential(
        &self,
        request: &CreationRequest,
    ) -> Result<Option<AttestationResult>, AuthError>;

    async fn get_assertion(
        &self,
        request: &AssertionRequest,
    ) -> Result<Option<AssertionResult>, AuthError>;
}

/// Authentication options fetch outcome. `NoRegisteredDevices` drives
/// enrollment rather than an error phase.
#[derive(Debug)]
pub enum AuthOptions {
    Options(Value),
    NoRegisteredDevices,
}

/// Transport to the gateway service.
#[async_trait]
pub trait MfaGateway: Send + Sync {
    async fn registration_options(&self) -> Result<Value, AuthError>;
    async fn verify_registration(
        &self,
        response: Value,
        device_name: Option<String>,
    ) -> Result<(), AuthError>;
    async fn authentication_options(&self) -> Result<AuthOptions, AuthError>;
    async fn verify_authentication(&self, response: Value) -> Result<(), AuthError>;
}

/// Outcome of one full ceremony round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyResult {
    Verified,
    /// The user never completed the ceremony on the device.
    NotCompleted,
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value, AuthError> {
    value
        .get(name)
        .ok_or_else(|| AuthError::Transport(format!("malformed server payload: missing {name}")))
}

fn decode_field(value: &Value, name: &str) -> Result<Vec<u8>, AuthError> {
    let text = field(value, name)?
        .as_str()
        .ok_or_else(|| AuthError::Transport(format!("malformed server payload: {name} not text")))?;
    base64url::decode(text)
}

fn decode_id_list(options: &Value, name: &str) -> Result<Vec<Vec<u8>>, AuthError> {
    let Some(entries) = options.get(name) else {
        return Ok(Vec::new());
    };
    let entries = entries
        .as_array()
        .ok_or_else(|| AuthError::Transport(format!("malformed server payload: {name} not a list")))?;
    entries.iter().map(|entry| decode_field(entry, "id")).collect()
}

/// Decode registration options. Malformed payloads are a server error, never
/// silently coerced.
pub fn parse_creation_options(options: &Value) -> Result<CreationRequest, AuthError> {
    Ok(CreationRequest {
        challenge: decode_field(options, "challenge")?,
        user_handle: decode_field(field(options, "user")?, "id")?,
        exclude_credential_ids: decode_id_list(options, "excludeCredentials")?,
        options: options.clone(),
    })
}

/// Decode authentication options.
pub fn parse_assertion_options(options: &Value) -> Result<AssertionRequest, AuthError> {
    Ok(AssertionRequest {
        challenge: decode_field(options, "challenge")?,
        allow_credential_ids: decode_id_list(options, "allowCredentials")?,
        options: options.clone(),
    })
}

/// Encode a binary attestation as wire JSON.
#[must_use]
pub fn attestation_to_wire(result: &AttestationResult) -> Value {
    json!({
        "id": base64url::encode(&result.credential_id),
        "rawId": base64url::encode(&result.credential_id),
        "type": "public-key",
        "response": {
            "clientDataJSON": base64url::encode(&result.client_data),
            "attestationObject": base64url::encode(&result.attestation_object),
        },
    })
}

/// Encode a binary assertion as wire JSON.
#[must_use]
pub fn assertion_to_wire(result: &AssertionResult) -> Value {
    let mut response = json!({
        "clientDataJSON": base64url::encode(&result.client_data),
        "authenticatorData": base64url::encode(&result.authenticator_data),
        "signature": base64url::encode(&result.signature),
    });
    if let Some(user_handle) = &result.user_handle {
        response["userHandle"] = Value::String(base64url::encode(user_handle));
    }
    json!({
        "id": base64url::encode(&result.credential_id),
        "rawId": base64url::encode(&result.credential_id),
        "type": "public-key",
        "response": response,
    })
}

pub struct CeremonyClient<P, G> {
    platform: P,
    gateway: G,
}

impl<P: PlatformAuthenticator, G: MfaGateway> CeremonyClient<P, G> {
    pub fn new(platform: P, gateway: G) -> Self {
        Self { platform, gateway }
    }

    /// Full registration round-trip: fetch options, run the platform
    /// ceremony, submit the attestation.
    ///
    /// # Errors
    /// `DeviceCapability` when the platform has no credential API,
    /// `Transport` on network or payload problems, `Verification` when the
    /// gateway rejects the attestation.
    pub async fn register(&self, device_name: Option<String>) -> Result<CeremonyResult, AuthError> {
        if !self.platform.is_available() {
            return Err(AuthError::DeviceCapability);
        }

        let options = self.gateway.registration_options().await?;
        let request = parse_creation_options(&options)?;

        let Some(attestation) = self.platform.create_credential(&request).await? else {
            return Ok(CeremonyResult::NotCompleted);
        };

        self.gateway
            .verify_registration(attestation_to_wire(&attestation), device_name)
            .await?;
        Ok(CeremonyResult::Verified)
    }

    /// Fetch authentication options without running a ceremony. The caller
    /// decides what an empty credential list means for its state.
    ///
    /// # Errors
    /// `Transport` on network or payload problems, gate errors pass through.
    pub async fn fetch_authentication_options(&self) -> Result<AuthOptions, AuthError> {
        self.gateway.authentication_options().await
    }

    /// Run the assertion ceremony against previously fetched options and
    /// submit the result.
    ///
    /// # Errors
    /// Same taxonomy as [`Self::register`].
    pub async fn authenticate(&self, options: &Value) -> Result<CeremonyResult, AuthError> {
        if !self.platform.is_available() {
            return Err(AuthError::DeviceCapability);
        }

        let request = parse_assertion_options(options)?;

        let Some(assertion) = self.platform.get_assertion(&request).await? else {
            return Ok(CeremonyResult::NotCompleted);
        };

        self.gateway
            .verify_authentication(assertion_to_wire(&assertion))
            .await?;
        Ok(CeremonyResult::Verified)
    }
}
