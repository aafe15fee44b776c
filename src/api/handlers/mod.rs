//! Handler wiring: shared state and per-request caller metadata.

use axum::http::HeaderMap;
use std::sync::Arc;

use crate::gate::IdentityGate;
use crate::mfa::rate_limit::RateLimiter;
use crate::mfa::service::{MfaService, RequestContext};

pub mod health;
pub mod mfa;

pub struct AppState {
    pub gate: IdentityGate,
    pub service: MfaService,
    pub limiter: Arc<dyn RateLimiter>,
}

/// Caller metadata from proxy headers, audit-log only. The first
/// `X-Forwarded-For` hop is taken as-is, falling back to `X-Real-IP`; it is
/// informational, not trusted for authorization.
#[must_use]
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    RequestContext { ip, user_agent }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1".parse().unwrap(),
        );
        headers.insert(axum::http::header::USER_AGENT, "test-agent".parse().unwrap());

        let ctx = request_context(&headers);
        assert_eq!(ctx.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(ctx.user_agent.as_deref(), Some("test-agent"));
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(request_context(&headers).ip.as_deref(), Some("198.51.100.4"));
    }

    #[test]
    fn missing_headers_yield_empty_context() {
        let ctx = request_context(&HeaderMap::new());
        assert!(ctx.ip.is_none());
        assert!(ctx.user_agent.is_none());
    }
}
