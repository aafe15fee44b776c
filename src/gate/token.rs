//! Bearer token extraction and remote verification.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;

use crate::error::AuthError;

/// Fallback header for clients that cannot set `Authorization`.
pub const ID_TOKEN_HEADER: &str = "x-auth-id-token";

/// Identity attested by the token issuer.
#[derive(Clone, Debug)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: String,
    pub role: Option<String>,
}

/// Validates a bearer token and returns the identity behind it.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Pull the bearer token from `Authorization` or the fallback header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AuthError::Authentication)?;
        return value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Authentication);
    }

    headers
        .get(ID_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Authentication)
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    uid: String,
    email: String,
    role: Option<String>,
}

/// Verifies tokens against the issuer's introspection endpoint.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpTokenVerifier {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: url::Url) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("token introspection: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::Authentication);
        }

        let body: IntrospectionResponse = response
            .json()
            .await
            .map_err(|_| AuthError::Authentication)?;

        Ok(VerifiedIdentity {
            uid: body.uid,
            email: body.email,
            role: body.role,
        })
    }
}
