//! Ceremony engine seam over the `WebAuthn` protocol library.
//!
//! The engine is stateless: it returns serialized ceremony state alongside
//! the browser options, and takes that state back on finish. Where it lives
//! between the two calls is the challenge store's problem, which keeps this
//! layer free of any per-process session map.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use uuid::Uuid;
use webauthn_rs::prelude::*;

use crate::mfa::models::CredentialRecord;

/// Browser creation options plus the server half of the ceremony.
#[derive(Debug)]
pub struct RegistrationStart {
    pub options: Value,
    pub state: Vec<u8>,
}

/// A credential accepted at the end of registration.
#[derive(Debug)]
pub struct RegisteredCredential {
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub sign_count: i64,
}

#[derive(Debug)]
pub struct AuthenticationStart {
    pub options: Value,
    pub state: Vec<u8>,
}

/// A verified assertion: which credential signed, and its reported counter.
#[derive(Debug)]
pub struct AssertionOutcome {
    pub credential_id: Vec<u8>,
    pub sign_count: i64,
}

pub trait CeremonyEngine: Send + Sync {
    fn begin_registration(
        &self,
        identity_id: &str,
        email: &str,
        exclude: &[Vec<u8>],
    ) -> Result<RegistrationStart>;

    fn finish_registration(&self, state: &[u8], response: &Value) -> Result<RegisteredCredential>;

    fn begin_authentication(&self, credentials: &[CredentialRecord]) -> Result<AuthenticationStart>;

    fn finish_authentication(&self, state: &[u8], response: &Value) -> Result<AssertionOutcome>;
}

/// Production engine backed by `webauthn-rs` security-key ceremonies.
pub struct WebauthnEngine {
    webauthn: Webauthn,
}

impl WebauthnEngine {
    /// # Errors
    /// Returns error if the relying party origin is not a valid URL or the
    /// `WebAuthn` builder rejects the configuration.
    pub fn new(rp_id: &str, rp_origin: &str, rp_name: &str) -> Result<Self> {
        let rp_origin_url = Url::parse(rp_origin)?;
        let webauthn = WebauthnBuilder::new(rp_id, &rp_origin_url)?
            .rp_name(rp_name)
            .build()?;
        Ok(Self { webauthn })
    }

    /// Identities arrive as opaque strings; the protocol wants a UUID user
    /// handle. v5 over the OID namespace keeps the mapping stable.
    fn user_handle(identity_id: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, identity_id.as_bytes())
    }

    /// The library wraps browser options in `{"publicKey": ...}`; clients
    /// expect the inner object.
    fn unwrap_public_key(mut value: Value) -> Result<Value> {
        value
            .get_mut("publicKey")
            .map(Value::take)
            .ok_or_else(|| anyhow!("challenge response missing publicKey envelope"))
    }
}

impl CeremonyEngine for WebauthnEngine {
    fn begin_registration(
        &self,
        identity_id: &str,
        email: &str,
        exclude: &[Vec<u8>],
    ) -> Result<RegistrationStart> {
        let exclude_credentials: Vec<CredentialID> =
            exclude.iter().cloned().map(Into::into).collect();

        let (challenge, registration) = self.webauthn.start_securitykey_registration(
            Self::user_handle(identity_id),
            email,
            email,
            Some(exclude_credentials),
            None, // Attestation CA list
            None, // Authenticator attachment
        )?;

        Ok(RegistrationStart {
            options: Self::unwrap_public_key(serde_json::to_value(&challenge)?)?,
            state: serde_json::to_vec(&registration)?,
        })
    }

    fn finish_registration(&self, state: &[u8], response: &Value) -> Result<RegisteredCredential> {
        let registration: SecurityKeyRegistration =
            serde_json::from_slice(state).context("Failed to restore registration state")?;
        let reg_response: RegisterPublicKeyCredential =
            serde_json::from_value(response.clone())
                .context("Malformed attestation response")?;

        let key = self
            .webauthn
            .finish_securitykey_registration(&reg_response, &registration)?;

        Ok(RegisteredCredential {
            credential_id: key.cred_id().as_slice().to_vec(),
            public_key: serde_json::to_vec(&key)?,
            sign_count: 0,
        })
    }

    fn begin_authentication(
        &self,
        credentials: &[CredentialRecord],
    ) -> Result<AuthenticationStart> {
        let keys: Vec<SecurityKey> = credentials
            .iter()
            .filter_map(|record| serde_json::from_slice(&record.public_key).ok())
            .collect();
        if keys.is_empty() {
            return Err(anyhow!("No usable credentials for authentication"));
        }

        let (challenge, authentication) = self.webauthn.start_securitykey_authentication(&keys)?;

        Ok(AuthenticationStart {
            options: Self::unwrap_public_key(serde_json::to_value(&challenge)?)?,
            state: serde_json::to_vec(&authentication)?,
        })
    }

    fn finish_authentication(&self, state: &[u8], response: &Value) -> Result<AssertionOutcome> {
        let authentication: SecurityKeyAuthentication =
            serde_json::from_slice(state).context("Failed to restore authentication state")?;
        let auth_response: PublicKeyCredential = serde_json::from_value(response.clone())
            .context("Malformed assertion response")?;

        let result = self
            .webauthn
            .finish_securitykey_authentication(&auth_response, &authentication)?;

        Ok(AssertionOutcome {
            credential_id: result.cred_id().as_slice().to_vec(),
            sign_count: i64::from(result.counter()),
        })
    }
}
