//! Challenge issuance and ceremony verification.
//!
//! The service owns the protocol rules the engine cannot see on its own:
//! challenges are single-use and expire, a credential only counts for the
//! identity it was enrolled under, and the sign counter must strictly grow
//! on every verified assertion. Challenge, binding, and signature failures
//! all leave the service as [`AuthError::Challenge`] or
//! [`AuthError::Verification`], which the HTTP boundary renders identically.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{AuthError, GatewayError};
use crate::gate::VerifiedIdentity;
use crate::mfa::engine::CeremonyEngine;
use crate::mfa::models::{ChallengeKind, CredentialRecord};
use crate::mfa::store::{ChallengeStore, CredentialStore, NewAuditEntry};

const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 120;
const DEFAULT_DEVICE_NAME: &str = "Security key";

/// Caller metadata carried into the audit log.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct MfaService {
    engine: Arc<dyn CeremonyEngine>,
    credentials: Arc<dyn CredentialStore>,
    challenges: Arc<dyn ChallengeStore>,
    challenge_ttl: Duration,
}

impl MfaService {
    #[must_use]
    pub fn new(
        engine: Arc<dyn CeremonyEngine>,
        credentials: Arc<dyn CredentialStore>,
        challenges: Arc<dyn ChallengeStore>,
    ) -> Self {
        Self {
            engine,
            credentials,
            challenges,
            challenge_ttl: Duration::seconds(DEFAULT_CHALLENGE_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    /// Issue a registration challenge, excluding every credential the
    /// identity already owns so the same authenticator cannot re-enroll.
    ///
    /// # Errors
    /// Returns error on storage or challenge generation failure.
    pub async fn issue_registration_challenge(
        &self,
        identity: &VerifiedIdentity,
    ) -> Result<Value, GatewayError> {
        let existing = self.credentials.list_for_identity(&identity.uid).await?;
        let exclude: Vec<Vec<u8>> = existing.into_iter().map(|r| r.credential_id).collect();

        let start = self
            .engine
            .begin_registration(&identity.uid, &identity.email, &exclude)?;

        self.challenges
            .put(
                &identity.uid,
                ChallengeKind::Registration,
                &start.state,
                Utc::now() + self.challenge_ttl,
            )
            .await?;

        Ok(start.options)
    }

    /// Verify an attestation result and persist the new credential.
    ///
    /// # Errors
    /// `Challenge` when no live registration challenge exists for the
    /// identity, `Verification` when the attestation does not check out.
    pub async fn verify_registration(
        &self,
        identity: &VerifiedIdentity,
        response: &Value,
        device_name: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<(), GatewayError> {
        let state = self
            .consume_challenge(&identity.uid, ChallengeKind::Registration)
            .await?;

        let registered = match self.engine.finish_registration(&state, response) {
            Ok(registered) => registered,
            Err(err) => {
                info!("registration verification failed for {}: {err}", identity.uid);
                self.audit(identity, None, "register", "denied", ctx).await;
                return Err(AuthError::Verification.into());
            }
        };

        let record = CredentialRecord {
            credential_id: registered.credential_id,
            identity_id: identity.uid.clone(),
            device_name: device_name.unwrap_or(DEFAULT_DEVICE_NAME).to_string(),
            public_key: registered.public_key,
            sign_count: registered.sign_count,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.credentials.insert(&record).await?;
        self.audit(identity, Some(&record.credential_id), "register", "ok", ctx)
            .await;

        Ok(())
    }

    /// Issue an authentication challenge scoped to the identity's enrolled
    /// credentials. `Ok(None)` means nothing is enrolled; that outcome drives
    /// enrollment and is not a failure.
    ///
    /// # Errors
    /// Returns error on storage or challenge generation failure.
    pub async fn issue_authentication_challenge(
        &self,
        identity: &VerifiedIdentity,
    ) -> Result<Option<Value>, GatewayError> {
        let credentials = self.credentials.list_for_identity(&identity.uid).await?;
        if credentials.is_empty() {
            return Ok(None);
        }

        let start = self.engine.begin_authentication(&credentials)?;

        self.challenges
            .put(
                &identity.uid,
                ChallengeKind::Authentication,
                &start.state,
                Utc::now() + self.challenge_ttl,
            )
            .await?;

        Ok(Some(start.options))
    }

    /// Verify an assertion result against the stored credential.
    ///
    /// The reported sign counter must be strictly greater than the stored
    /// one. An equal counter is treated as a clone or replay and fails, even
    /// though some authenticators legitimately never increment.
    ///
    /// # Errors
    /// `Challenge` when no live authentication challenge exists,
    /// `Verification` on signature, binding, or counter failure.
    pub async fn verify_authentication(
        &self,
        identity: &VerifiedIdentity,
        response: &Value,
        ctx: &RequestContext,
    ) -> Result<(), GatewayError> {
        let state = self
            .consume_challenge(&identity.uid, ChallengeKind::Authentication)
            .await?;

        let outcome = match self.engine.finish_authentication(&state, response) {
            Ok(outcome) => outcome,
            Err(err) => {
                info!("assertion verification failed for {}: {err}", identity.uid);
                self.audit(identity, None, "authenticate", "denied", ctx).await;
                return Err(AuthError::Verification.into());
            }
        };

        let Some(record) = self.credentials.find(&outcome.credential_id).await? else {
            self.audit(identity, Some(&outcome.credential_id), "authenticate", "denied", ctx)
                .await;
            return Err(AuthError::Verification.into());
        };

        if record.identity_id != identity.uid || outcome.sign_count <= record.sign_count {
            self.audit(identity, Some(&outcome.credential_id), "authenticate", "denied", ctx)
                .await;
            return Err(AuthError::Verification.into());
        }

        self.credentials
            .update_usage(&outcome.credential_id, outcome.sign_count)
            .await?;
        self.audit(identity, Some(&outcome.credential_id), "authenticate", "ok", ctx)
            .await;

        Ok(())
    }

    /// Delete one credential, or all of them when `credential_id` is absent.
    /// Returns how many records were removed.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn revoke(
        &self,
        acting: &VerifiedIdentity,
        target_uid: &str,
        credential_id: Option<&[u8]>,
        ctx: &RequestContext,
    ) -> Result<u64, GatewayError> {
        let revoked = match credential_id {
            Some(credential_id) => self.credentials.delete(target_uid, credential_id).await?,
            None => self.credentials.delete_all(target_uid).await?,
        };

        info!(
            "{} revoked {revoked} credential(s) for {target_uid}",
            acting.uid
        );
        self.audit(acting, credential_id, "revoke", "ok", ctx).await;

        Ok(revoked)
    }

    /// # Errors
    /// Returns error if the database query fails.
    pub async fn list_devices(
        &self,
        identity: &VerifiedIdentity,
    ) -> Result<Vec<CredentialRecord>, GatewayError> {
        Ok(self.credentials.list_for_identity(&identity.uid).await?)
    }

    async fn consume_challenge(
        &self,
        identity_id: &str,
        kind: ChallengeKind,
    ) -> Result<Vec<u8>, GatewayError> {
        let Some(challenge) = self.challenges.consume(identity_id, kind).await? else {
            return Err(AuthError::Challenge.into());
        };
        if challenge.expires_at < Utc::now() {
            return Err(AuthError::Challenge.into());
        }
        Ok(challenge.state)
    }

    // Audit writes never fail the operation they describe.
    async fn audit(
        &self,
        identity: &VerifiedIdentity,
        credential_id: Option<&[u8]>,
        action: &str,
        outcome: &str,
        ctx: &RequestContext,
    ) {
        let entry = NewAuditEntry {
            identity_id: &identity.uid,
            credential_id,
            action,
            outcome,
            detail: None,
            ip_address: ctx.ip.as_deref(),
            user_agent: ctx.user_agent.as_deref(),
        };
        if let Err(err) = self.credentials.record_audit(entry).await {
            error!("Failed to write audit log: {err}");
        }
    }
}
