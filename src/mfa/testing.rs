//! In-memory doubles for exercising the service and handlers without a
//! database or a real authenticator.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AuthError;
use crate::mfa::engine::{
    AssertionOutcome, AuthenticationStart, CeremonyEngine, RegisteredCredential, RegistrationStart,
};
use crate::mfa::models::{ChallengeKind, CredentialRecord, StoredChallenge};
use crate::mfa::rate_limit::{Operation, RateLimiter};
use crate::mfa::store::{ChallengeStore, CredentialStore, NewAuditEntry};

#[derive(Default)]
pub(crate) struct MemoryCredentialStore {
    records: Mutex<Vec<CredentialRecord>>,
    audit: Mutex<Vec<String>>,
}

impl MemoryCredentialStore {
    pub(crate) fn audit_actions(&self) -> Vec<String> {
        self.audit.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn insert(&self, record: &CredentialRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.credential_id == record.credential_id)
        {
            return Err(anyhow!("duplicate credential id"));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn list_for_identity(&self, identity_id: &str) -> Result<Vec<CredentialRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.identity_id == identity_id)
            .cloned()
            .collect())
    }

    async fn find(&self, credential_id: &[u8]) -> Result<Option<CredentialRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.credential_id == credential_id)
            .cloned())
    }

    async fn update_usage(&self, credential_id: &[u8], sign_count: i64) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.credential_id == credential_id) {
            record.sign_count = sign_count;
            record.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete(&self, identity_id: &str, credential_id: &[u8]) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| !(r.identity_id == identity_id && r.credential_id == credential_id));
        Ok((before - records.len()) as u64)
    }

    async fn delete_all(&self, identity_id: &str) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.identity_id != identity_id);
        Ok((before - records.len()) as u64)
    }

    async fn record_audit(&self, entry: NewAuditEntry<'_>) -> Result<()> {
        self.audit
            .lock()
            .unwrap()
            .push(format!("{}:{}", entry.action, entry.outcome));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryChallengeStore {
    entries: Mutex<HashMap<(String, &'static str), (Vec<u8>, DateTime<Utc>)>>,
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn put(
        &self,
        identity_id: &str,
        kind: ChallengeKind,
        state: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert((identity_id.to_string(), kind.as_str()), (state.to_vec(), expires_at));
        Ok(())
    }

    async fn consume(
        &self,
        identity_id: &str,
        kind: ChallengeKind,
    ) -> Result<Option<StoredChallenge>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .remove(&(identity_id.to_string(), kind.as_str()))
            .map(|(state, expires_at)| StoredChallenge { state, expires_at }))
    }
}

/// Deterministic ceremony engine. A "response" is accepted when it carries
/// `credentialId` (byte array) and `signCount` fields; registration state is
/// the literal bytes `reg`, authentication state `auth`.
#[derive(Default)]
pub(crate) struct FakeEngine;

impl FakeEngine {
    fn response_fields(response: &Value) -> Result<(Vec<u8>, i64)> {
        let credential_id = response
            .get("credentialId")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_u64).map(|b| b as u8).collect())
            .ok_or_else(|| anyhow!("missing credentialId"))?;
        let sign_count = response
            .get("signCount")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("missing signCount"))?;
        Ok((credential_id, sign_count))
    }
}

impl CeremonyEngine for FakeEngine {
    fn begin_registration(
        &self,
        identity_id: &str,
        _email: &str,
        exclude: &[Vec<u8>],
    ) -> Result<RegistrationStart> {
        Ok(RegistrationStart {
            options: json!({
                "challenge": "c2VjcmV0",
                "rp": { "id": "localhost", "name": "test" },
                "user": { "name": identity_id },
                "excludeCredentials": exclude
                    .iter()
                    .map(|id| json!({ "id": id }))
                    .collect::<Vec<_>>(),
            }),
            state: b"reg".to_vec(),
        })
    }

    fn finish_registration(&self, state: &[u8], response: &Value) -> Result<RegisteredCredential> {
        if state != b"reg" {
            return Err(anyhow!("wrong state"));
        }
        let (credential_id, _) = Self::response_fields(response)?;
        Ok(RegisteredCredential {
            public_key: credential_id.clone(),
            credential_id,
            sign_count: 0,
        })
    }

    fn begin_authentication(
        &self,
        credentials: &[CredentialRecord],
    ) -> Result<AuthenticationStart> {
        Ok(AuthenticationStart {
            options: json!({
                "challenge": "c2VjcmV0",
                "rpId": "localhost",
                "allowCredentials": credentials
                    .iter()
                    .map(|c| json!({ "id": c.credential_id, "type": "public-key" }))
                    .collect::<Vec<_>>(),
                "userVerification": "preferred",
            }),
            state: b"auth".to_vec(),
        })
    }

    fn finish_authentication(&self, state: &[u8], response: &Value) -> Result<AssertionOutcome> {
        if state != b"auth" {
            return Err(anyhow!("wrong state"));
        }
        let (credential_id, sign_count) = Self::response_fields(response)?;
        Ok(AssertionOutcome {
            credential_id,
            sign_count,
        })
    }
}

/// Counts calls per (identity, operation) and denies past a fixed limit.
pub(crate) struct CountingLimiter {
    limit: u32,
    calls: Mutex<HashMap<(String, &'static str), u32>>,
}

impl CountingLimiter {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            limit,
            calls: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for CountingLimiter {
    async fn check(&self, identity_id: &str, operation: Operation) -> Result<(), AuthError> {
        let mut calls = self.calls.lock().unwrap();
        let count = calls
            .entry((identity_id.to_string(), operation.as_str()))
            .or_insert(0);
        *count += 1;
        if *count > self.limit {
            return Err(AuthError::RateLimit);
        }
        Ok(())
    }
}
