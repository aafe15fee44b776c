//! Storage rows for credentials, pending challenges, and the audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};

/// A registered second-factor credential bound to one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub credential_id: Vec<u8>,
    pub identity_id: String,
    pub device_name: String,
    pub public_key: Vec<u8>,
    pub sign_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for CredentialRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            credential_id: row.try_get("credential_id")?,
            identity_id: row.try_get("identity_id")?,
            device_name: row.try_get("device_name")?,
            public_key: row.try_get("public_key")?,
            sign_count: row.try_get("sign_count")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

/// Which ceremony a pending challenge belongs to. One slot per kind per
/// identity; issuing a new challenge replaces the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Registration,
    Authentication,
}

impl ChallengeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }
}

/// Serialized ceremony state retrieved on consume.
#[derive(Debug, Clone)]
pub struct StoredChallenge {
    pub state: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}
