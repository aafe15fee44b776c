//! # StepGate (Step-Up Authentication Gateway)
//!
//! `stepgate` gates an application behind a two-step identity check: a
//! primary sign-in against an external identity provider restricted to a
//! corporate email domain, followed by a device-bound public-key second
//! factor (a `WebAuthn` security-key ceremony).
//!
//! ## Server
//!
//! The HTTP boundary verifies the caller's bearer token against the
//! provider's introspection endpoint, enforces the domain allowlist and
//! (for revocation) the admin role, and rate-limits every operation per
//! (identity, operation) before any ceremony work runs.
//!
//! Challenges are single-use, short-lived, and persisted in `PostgreSQL`,
//! so any instance behind a balancer can finish a ceremony another one
//! started. A verified assertion must present a sign counter strictly
//! greater than the stored one; anything else is treated as a cloned or
//! replayed credential.
//!
//! ## Client
//!
//! The client half carries the base64url codec, the platform ceremony
//! round-trip, and a pure phase state machine which guarantees that every
//! transient failure leaves the user a recovery path. Only a failed domain
//! check is terminal.

pub mod api;
pub mod cli;
pub mod client;
pub mod error;
pub mod gate;
pub mod mfa;

#[cfg(test)]
mod tests {
    use crate::api::{APP_USER_AGENT, GIT_COMMIT_HASH};

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
