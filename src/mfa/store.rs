//! Persistence seams for credentials and pending challenges.
//!
//! Challenges live in the database rather than process memory so a restart
//! (or a second instance behind the balancer) cannot strand an in-flight
//! ceremony. Consume is a single `DELETE .. RETURNING`, which makes reuse a
//! miss no matter how the requests interleave.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::mfa::models::{ChallengeKind, CredentialRecord, StoredChallenge};

/// Audit log fields for one event. Written best-effort by the service.
#[derive(Debug, Clone, Copy)]
pub struct NewAuditEntry<'a> {
    pub identity_id: &'a str,
    pub credential_id: Option<&'a [u8]>,
    pub action: &'a str,
    pub outcome: &'a str,
    pub detail: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert(&self, record: &CredentialRecord) -> Result<()>;
    async fn list_for_identity(&self, identity_id: &str) -> Result<Vec<CredentialRecord>>;
    async fn find(&self, credential_id: &[u8]) -> Result<Option<CredentialRecord>>;
    async fn update_usage(&self, credential_id: &[u8], sign_count: i64) -> Result<()>;
    async fn delete(&self, identity_id: &str, credential_id: &[u8]) -> Result<u64>;
    async fn delete_all(&self, identity_id: &str) -> Result<u64>;
    async fn record_audit(&self, entry: NewAuditEntry<'_>) -> Result<()>;
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Store serialized ceremony state, replacing any previous challenge of
    /// the same kind for this identity.
    async fn put(
        &self,
        identity_id: &str,
        kind: ChallengeKind,
        state: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove and return the pending challenge, if any. Expiry is checked by
    /// the caller against the returned timestamp.
    async fn consume(
        &self,
        identity_id: &str,
        kind: ChallengeKind,
    ) -> Result<Option<StoredChallenge>>;
}

pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn insert(&self, record: &CredentialRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO mfa_credentials (credential_id, identity_id, device_name, public_key, sign_count)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&record.credential_id)
        .bind(&record.identity_id)
        .bind(&record.device_name)
        .bind(&record.public_key)
        .bind(record.sign_count)
        .execute(&self.pool)
        .await
        .context("Failed to insert credential")?;

        Ok(())
    }

    async fn list_for_identity(&self, identity_id: &str) -> Result<Vec<CredentialRecord>> {
        sqlx::query_as::<_, CredentialRecord>(
            "SELECT * FROM mfa_credentials WHERE identity_id = $1 ORDER BY created_at DESC",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list credentials")
    }

    async fn find(&self, credential_id: &[u8]) -> Result<Option<CredentialRecord>> {
        sqlx::query_as::<_, CredentialRecord>(
            "SELECT * FROM mfa_credentials WHERE credential_id = $1",
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch credential")
    }

    async fn update_usage(&self, credential_id: &[u8], sign_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE mfa_credentials SET sign_count = $1, last_used_at = NOW() WHERE credential_id = $2",
        )
        .bind(sign_count)
        .bind(credential_id)
        .execute(&self.pool)
        .await
        .context("Failed to update credential usage")?;
        Ok(())
    }

    async fn delete(&self, identity_id: &str, credential_id: &[u8]) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM mfa_credentials WHERE identity_id = $1 AND credential_id = $2")
                .bind(identity_id)
                .bind(credential_id)
                .execute(&self.pool)
                .await
                .context("Failed to delete credential")?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self, identity_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM mfa_credentials WHERE identity_id = $1")
            .bind(identity_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete credentials")?;
        Ok(result.rows_affected())
    }

    async fn record_audit(&self, entry: NewAuditEntry<'_>) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO mfa_audit_log (identity_id, credential_id, action, outcome, detail, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(entry.identity_id)
        .bind(entry.credential_id)
        .bind(entry.action)
        .bind(entry.outcome)
        .bind(entry.detail)
        .bind(entry.ip_address)
        .bind(entry.user_agent)
        .execute(&self.pool)
        .await
        .context("Failed to write audit log")?;
        Ok(())
    }
}

pub struct PgChallengeStore {
    pool: PgPool,
}

impl PgChallengeStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChallengeStore for PgChallengeStore {
    async fn put(
        &self,
        identity_id: &str,
        kind: ChallengeKind,
        state: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        // Opportunistic sweep of challenges nobody will consume anymore.
        sqlx::query("DELETE FROM mfa_challenges WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .context("Failed to sweep expired challenges")?;

        sqlx::query(
            r"
            INSERT INTO mfa_challenges (identity_id, kind, state, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identity_id, kind)
            DO UPDATE SET state = EXCLUDED.state, expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(identity_id)
        .bind(kind.as_str())
        .bind(state)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("Failed to store challenge")?;
        Ok(())
    }

    async fn consume(
        &self,
        identity_id: &str,
        kind: ChallengeKind,
    ) -> Result<Option<StoredChallenge>> {
        let row: Option<(Vec<u8>, DateTime<Utc>)> = sqlx::query_as(
            r"
            DELETE FROM mfa_challenges
            WHERE identity_id = $1 AND kind = $2
            RETURNING state, expires_at
            ",
        )
        .bind(identity_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to consume challenge")?;

        Ok(row.map(|(state, expires_at)| StoredChallenge { state, expires_at }))
    }
}
