//! Identity gate in front of the MFA routes.
//!
//! Every request passes the same sequence: resolve the bearer token to an
//! identity, check the email domain against the allowlist, then (for admin
//! routes) check the role claim. Ordering matters for status codes: a bad
//! token is always 401, a valid token outside the allowlist is 403.

pub mod token;

use axum::http::HeaderMap;
use std::sync::Arc;

use crate::error::AuthError;
pub use token::{TokenVerifier, VerifiedIdentity, bearer_token};

/// Request bodies above this are rejected before any handler runs.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Role claim required for credential revocation.
pub const ADMIN_ROLE: &str = "admin";

#[derive(Clone, Debug)]
pub struct GateConfig {
    allowed_domains: Vec<String>,
}

impl GateConfig {
    #[must_use]
    pub fn new(allowed_domains: Vec<String>) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { allowed_domains }
    }

    /// Exact, case-insensitive domain match. Subdomains do not inherit.
    /// An empty allowlist disables the check (development setups).
    #[must_use]
    pub fn domain_allowed(&self, email: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        let Some(domain) = email.rsplit_once('@').map(|(_, d)| d) else {
            return false;
        };
        let domain = domain.to_ascii_lowercase();
        self.allowed_domains.iter().any(|allowed| *allowed == domain)
    }
}

pub struct IdentityGate {
    verifier: Arc<dyn TokenVerifier>,
    config: GateConfig,
}

impl IdentityGate {
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>, config: GateConfig) -> Self {
        Self { verifier, config }
    }

    /// Token then domain. Token failures never reveal whether the domain
    /// would have passed.
    pub async fn require_identity(&self, headers: &HeaderMap) -> Result<VerifiedIdentity, AuthError> {
        let token = bearer_token(headers)?;
        let identity = self.verifier.verify(token).await?;

        if !self.config.domain_allowed(&identity.email) {
            return Err(AuthError::Authorization);
        }

        Ok(identity)
    }

    /// Same as [`Self::require_identity`] plus the admin role claim.
    pub async fn require_admin(&self, headers: &HeaderMap) -> Result<VerifiedIdentity, AuthError> {
        let identity = self.require_identity(headers).await?;

        if identity.role.as_deref() != Some(ADMIN_ROLE) {
            return Err(AuthError::Authorization);
        }

        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::header::AUTHORIZATION;

    struct StaticVerifier {
        identity: VerifiedIdentity,
    }

    #[async_trait]
    impl TokenVerifier for StaticVerifier {
        async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
            if token == "valid" {
                Ok(self.identity.clone())
            } else {
                Err(AuthError::Authentication)
            }
        }
    }

    fn gate(email: &str, role: Option<&str>) -> IdentityGate {
        IdentityGate::new(
            Arc::new(StaticVerifier {
                identity: VerifiedIdentity {
                    uid: "uid-1".to_string(),
                    email: email.to_string(),
                    role: role.map(ToString::to_string),
                },
            }),
            GateConfig::new(vec!["example.com".to_string()]),
        )
    }

    fn headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn domain_match_is_exact_and_case_insensitive() {
        let config = GateConfig::new(vec!["Example.COM".to_string()]);
        assert!(config.domain_allowed("user@example.com"));
        assert!(config.domain_allowed("user@EXAMPLE.com"));
        assert!(!config.domain_allowed("user@sub.example.com"));
        assert!(!config.domain_allowed("user@examplexcom"));
        assert!(!config.domain_allowed("no-at-sign"));
    }

    #[test]
    fn empty_allowlist_disables_the_domain_check() {
        let config = GateConfig::new(vec![]);
        assert!(config.domain_allowed("anyone@anywhere.example"));

        // Blank entries do not count as an allowlist either.
        let config = GateConfig::new(vec![String::new(), "  ".to_string()]);
        assert!(config.domain_allowed("anyone@anywhere.example"));
    }

    #[tokio::test]
    async fn bad_token_is_authentication_even_with_bad_domain() {
        let gate = gate("user@elsewhere.org", None);
        let err = gate.require_identity(&headers("bogus")).await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication));
    }

    #[tokio::test]
    async fn valid_token_outside_allowlist_is_authorization() {
        let gate = gate("user@elsewhere.org", None);
        let err = gate.require_identity(&headers("valid")).await.unwrap_err();
        assert!(matches!(err, AuthError::Authorization));
    }

    #[tokio::test]
    async fn admin_route_rejects_non_admin_role() {
        let gate = gate("user@example.com", Some("viewer"));
        assert!(gate.require_identity(&headers("valid")).await.is_ok());
        let err = gate.require_admin(&headers("valid")).await.unwrap_err();
        assert!(matches!(err, AuthError::Authorization));
    }

    #[tokio::test]
    async fn admin_role_passes() {
        let gate = gate("admin@example.com", Some("admin"));
        assert!(gate.require_admin(&headers("valid")).await.is_ok());
    }
}
