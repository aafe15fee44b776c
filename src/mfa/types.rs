//! Wire types for the MFA routes. Field names follow the browser credential
//! API convention (camelCase); binary identifiers travel as base64url.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::client::base64url;
use crate::mfa::models::CredentialRecord;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterOptionsResponse {
    /// Creation options to hand to the platform credential API.
    #[schema(value_type = Object)]
    pub options: Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterVerifyRequest {
    /// Attestation response produced by the authenticator.
    #[schema(value_type = Object)]
    pub response: Value,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyResponse {
    pub verified: bool,
}

/// `options` is `null`, with `error = "no_registered_devices"`, when the
/// identity has nothing enrolled. That outcome is a 200, not a failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthenticateOptionsResponse {
    #[schema(value_type = Option<Object>)]
    pub options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const NO_REGISTERED_DEVICES: &str = "no_registered_devices";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthenticateVerifyRequest {
    /// Assertion response produced by the authenticator.
    #[schema(value_type = Object)]
    pub response: Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub target_uid: String,
    /// base64url credential id. Absent means revoke every credential.
    pub credential_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevokeResponse {
    pub success: bool,
    /// How many credentials the request removed.
    pub revoked: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub credential_id: String,
    pub device_name: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&CredentialRecord> for DeviceSummary {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            credential_id: base64url::encode(&record.credential_id),
            device_name: record.device_name.clone(),
            created_at: record.created_at,
            last_used_at: record.last_used_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_fields_are_camel_case() {
        let request: RevokeRequest =
            serde_json::from_str(r#"{"targetUid":"u1","credentialId":"AAAA"}"#).unwrap();
        assert_eq!(request.target_uid, "u1");
        assert_eq!(request.credential_id.as_deref(), Some("AAAA"));
    }

    #[test]
    fn no_devices_outcome_keeps_options_null() {
        let body: serde_json::Value = serde_json::to_value(AuthenticateOptionsResponse {
            options: None,
            error: Some(NO_REGISTERED_DEVICES.to_string()),
        })
        .unwrap();
        assert!(body["options"].is_null());
        assert_eq!(body["error"], NO_REGISTERED_DEVICES);

        // The success branch carries no error field at all.
        let body: serde_json::Value = serde_json::to_value(AuthenticateOptionsResponse {
            options: Some(serde_json::json!({ "challenge": "abc" })),
            error: None,
        })
        .unwrap();
        assert!(body.get("error").is_none());
    }

    #[test]
    fn device_summary_encodes_credential_id() {
        let record = CredentialRecord {
            credential_id: vec![0xfb, 0xff],
            identity_id: "u1".to_string(),
            device_name: "YubiKey".to_string(),
            public_key: Vec::new(),
            sign_count: 3,
            created_at: Utc::now(),
            last_used_at: None,
        };
        let summary = DeviceSummary::from(&record);
        assert_eq!(summary.credential_id, "-_8");
    }
}
