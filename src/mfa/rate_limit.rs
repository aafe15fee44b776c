//! Database-backed rate limiting for MFA operations.
//!
//! Fixed window per (identity, operation), synchronized through `PostgreSQL`
//! so limits hold across service instances. The counter bump is a single
//! upsert with `RETURNING`, so concurrent requests cannot both see a count
//! below the limit. Storage failures deny the request.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{Instrument, error};

use crate::error::AuthError;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Rate-limited operations, one counter each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RegisterOptions,
    RegisterVerify,
    AuthenticateOptions,
    AuthenticateVerify,
    Revoke,
    ListDevices,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegisterOptions => "register_options",
            Self::RegisterVerify => "register_verify",
            Self::AuthenticateOptions => "authenticate_options",
            Self::AuthenticateVerify => "authenticate_verify",
            Self::Revoke => "revoke",
            Self::ListDevices => "list_devices",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub register_options: i64,
    pub register_verify: i64,
    pub authenticate_options: i64,
    pub authenticate_verify: i64,
    pub revoke: i64,
    pub list_devices: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            register_options: 5,
            register_verify: 5,
            authenticate_options: 10,
            authenticate_verify: 10,
            revoke: 5,
            list_devices: 30,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn limit(&self, operation: Operation) -> i64 {
        match operation {
            Operation::RegisterOptions => self.register_options,
            Operation::RegisterVerify => self.register_verify,
            Operation::AuthenticateOptions => self.authenticate_options,
            Operation::AuthenticateVerify => self.authenticate_verify,
            Operation::Revoke => self.revoke,
            Operation::ListDevices => self.list_devices,
        }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count this attempt and deny with [`AuthError::RateLimit`] once the
    /// window limit is exceeded.
    async fn check(&self, identity_id: &str, operation: Operation) -> Result<(), AuthError>;
}

#[derive(Debug)]
pub struct PgRateLimiter {
    pool: PgPool,
    config: RateLimitConfig,
}

impl PgRateLimiter {
    #[must_use]
    pub fn new(pool: PgPool, config: RateLimitConfig) -> Self {
        Self { pool, config }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check(&self, identity_id: &str, operation: Operation) -> Result<(), AuthError> {
        let query = r"
            INSERT INTO mfa_rate_limits (identity_id, operation, window_start, count)
            VALUES ($1, $2, NOW(), 1)
            ON CONFLICT (identity_id, operation) DO UPDATE SET
                count = CASE
                    WHEN mfa_rate_limits.window_start > NOW() - $3::interval
                    THEN mfa_rate_limits.count + 1
                    ELSE 1
                END,
                window_start = CASE
                    WHEN mfa_rate_limits.window_start > NOW() - $3::interval
                    THEN mfa_rate_limits.window_start
                    ELSE NOW()
                END
            RETURNING count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        let row = sqlx::query(query)
            .bind(identity_id)
            .bind(operation.as_str())
            .bind(format!("{} seconds", self.config.window.as_secs()))
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                error!("Failed to bump rate limit counter: {err}");
                AuthError::RateLimit // Fail closed
            })?;

        let count: i64 = row.get(0);
        if count > self.config.limit(operation) {
            return Err(AuthError::RateLimit);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check(&self, _identity_id: &str, _operation: Operation) -> Result<(), AuthError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_per_operation() {
        let config = RateLimitConfig::default();
        assert_eq!(config.limit(Operation::RegisterOptions), 5);
        assert_eq!(config.limit(Operation::RegisterVerify), 5);
        assert_eq!(config.limit(Operation::AuthenticateOptions), 10);
        assert_eq!(config.limit(Operation::AuthenticateVerify), 10);
        assert_eq!(config.limit(Operation::Revoke), 5);
        assert_eq!(config.limit(Operation::ListDevices), 30);
        assert_eq!(config.window, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        for _ in 0..100 {
            assert!(limiter.check("uid-1", Operation::Revoke).await.is_ok());
        }
    }
}
