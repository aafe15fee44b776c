//! Error taxonomy shared by the gateway and the client library.
//!
//! Server-side, `Challenge` and `Verification` are deliberately collapsed to
//! one generic message on the wire so callers cannot distinguish challenge
//! reuse from signature failure (enumeration resistance). `Transport` and
//! `DeviceCapability` never cross the wire; they are client-local and drive
//! the recoverable error phase.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing, invalid, or expired bearer token.
    #[error("invalid or expired token")]
    Authentication,

    /// Email domain not allowlisted, or a role requirement not met.
    #[error("access denied")]
    Authorization,

    /// Too many operations for this identity inside the current window.
    #[error("too many requests")]
    RateLimit,

    /// Challenge missing, expired, already consumed, or of the wrong kind.
    #[error("challenge expired or already used")]
    Challenge,

    /// Ceremony result failed verification (signature, counter, binding).
    #[error("verification failed")]
    Verification,

    /// Network failure or a server response of an unexpected shape.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The platform has no credential API.
    #[error("credential API unavailable on this device")]
    DeviceCapability,
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            Self::Challenge | Self::Verification => StatusCode::BAD_REQUEST,
            Self::Transport(_) | Self::DeviceCapability => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message safe to return to callers. Challenge and verification failures
    /// share one string; rate-limit responses carry no threshold internals.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Authentication => "Invalid or expired token",
            Self::Authorization => "Access denied",
            Self::RateLimit => "Too many requests",
            Self::Challenge | Self::Verification => "Verification failed",
            Self::Transport(_) => "Upstream service unavailable",
            Self::DeviceCapability => "Credential API unavailable",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(json!({ "error": self.public_message() }))).into_response()
    }
}

/// Handler-level error. Storage failures are logged and surface as an
/// opaque 500; everything else delegates to [`AuthError`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Auth(err) => err.into_response(),
            Self::Internal(err) => {
                tracing::error!("gateway failure: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
