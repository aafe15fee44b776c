//! MFA route handlers.
//!
//! Every handler runs the same gauntlet in order: identity gate (401/403),
//! rate limit (429), then the actual challenge or verification work. The
//! limit is counted per (identity, operation), so the gate has to resolve
//! the identity first.

use axum::{
    Json,
    extract::Extension,
    http::HeaderMap,
};
use std::sync::Arc;

use crate::api::handlers::{AppState, request_context};
use crate::client::base64url;
use crate::error::{AuthError, GatewayError};
use crate::mfa::rate_limit::Operation;
use crate::mfa::types::{
    AuthenticateOptionsResponse, AuthenticateVerifyRequest, DeviceSummary, DevicesResponse,
    NO_REGISTERED_DEVICES, RegisterOptionsResponse, RegisterVerifyRequest, RevokeRequest,
    RevokeResponse, VerifyResponse,
};

#[utoipa::path(
    post,
    path = "/v1/mfa/register/options",
    responses(
        (status = 200, description = "Registration challenge issued", body = RegisterOptionsResponse),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Email domain not allowed"),
        (status = 429, description = "Too many requests")
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn register_options(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RegisterOptionsResponse>, GatewayError> {
    let identity = state.gate.require_identity(&headers).await?;
    state
        .limiter
        .check(&identity.uid, Operation::RegisterOptions)
        .await?;

    let options = state.service.issue_registration_challenge(&identity).await?;
    Ok(Json(RegisterOptionsResponse { options }))
}

#[utoipa::path(
    post,
    path = "/v1/mfa/register/verify",
    request_body = RegisterVerifyRequest,
    responses(
        (status = 200, description = "Credential registered", body = VerifyResponse),
        (status = 400, description = "Verification failed"),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Email domain not allowed"),
        (status = 429, description = "Too many requests")
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn register_verify(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterVerifyRequest>,
) -> Result<Json<VerifyResponse>, GatewayError> {
    let identity = state.gate.require_identity(&headers).await?;
    state
        .limiter
        .check(&identity.uid, Operation::RegisterVerify)
        .await?;

    let ctx = request_context(&headers);
    state
        .service
        .verify_registration(&identity, &request.response, request.device_name.as_deref(), &ctx)
        .await?;
    Ok(Json(VerifyResponse { verified: true }))
}

#[utoipa::path(
    post,
    path = "/v1/mfa/authenticate/options",
    responses(
        (status = 200, description = "Challenge issued, or no devices enrolled", body = AuthenticateOptionsResponse),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Email domain not allowed"),
        (status = 429, description = "Too many requests")
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn authenticate_options(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AuthenticateOptionsResponse>, GatewayError> {
    let identity = state.gate.require_identity(&headers).await?;
    state
        .limiter
        .check(&identity.uid, Operation::AuthenticateOptions)
        .await?;

    let response = match state.service.issue_authentication_challenge(&identity).await? {
        Some(options) => AuthenticateOptionsResponse {
            options: Some(options),
            error: None,
        },
        None => AuthenticateOptionsResponse {
            options: None,
            error: Some(NO_REGISTERED_DEVICES.to_string()),
        },
    };
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/mfa/authenticate/verify",
    request_body = AuthenticateVerifyRequest,
    responses(
        (status = 200, description = "Assertion verified", body = VerifyResponse),
        (status = 400, description = "Verification failed"),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Email domain not allowed"),
        (status = 429, description = "Too many requests")
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn authenticate_verify(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AuthenticateVerifyRequest>,
) -> Result<Json<VerifyResponse>, GatewayError> {
    let identity = state.gate.require_identity(&headers).await?;
    state
        .limiter
        .check(&identity.uid, Operation::AuthenticateVerify)
        .await?;

    let ctx = request_context(&headers);
    state
        .service
        .verify_authentication(&identity, &request.response, &ctx)
        .await?;
    Ok(Json(VerifyResponse { verified: true }))
}

#[utoipa::path(
    post,
    path = "/v1/mfa/revoke",
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "Credentials revoked", body = RevokeResponse),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Caller is not an admin"),
        (status = 429, description = "Too many requests")
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn revoke(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, GatewayError> {
    let identity = state.gate.require_admin(&headers).await?;
    state.limiter.check(&identity.uid, Operation::Revoke).await?;

    let credential_id = request
        .credential_id
        .as_deref()
        .map(|id| base64url::decode(id).map_err(|_| AuthError::Verification))
        .transpose()?;

    let ctx = request_context(&headers);
    let revoked = state
        .service
        .revoke(&identity, &request.target_uid, credential_id.as_deref(), &ctx)
        .await?;
    Ok(Json(RevokeResponse {
        success: true,
        revoked,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/mfa/devices",
    responses(
        (status = 200, description = "Enrolled devices for the caller", body = DevicesResponse),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Email domain not allowed"),
        (status = 429, description = "Too many requests")
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
pub async fn list_devices(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DevicesResponse>, GatewayError> {
    let identity = state.gate.require_identity(&headers).await?;
    state
        .limiter
        .check(&identity.uid, Operation::ListDevices)
        .await?;

    let devices = state
        .service
        .list_devices(&identity)
        .await?
        .iter()
        .map(DeviceSummary::from)
        .collect();
    Ok(Json(DevicesResponse { devices }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::AUTHORIZATION};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::gate::{GateConfig, IdentityGate, TokenVerifier, VerifiedIdentity};
    use crate::mfa::service::MfaService;
    use crate::mfa::testing::{CountingLimiter, FakeEngine, MemoryChallengeStore, MemoryCredentialStore};

    struct TokenMapVerifier;

    #[async_trait]
    impl TokenVerifier for TokenMapVerifier {
        async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
            match token {
                "user" => Ok(VerifiedIdentity {
                    uid: "u1".to_string(),
                    email: "u1@allowed.com".to_string(),
                    role: None,
                }),
                "admin" => Ok(VerifiedIdentity {
                    uid: "a1".to_string(),
                    email: "admin@allowed.com".to_string(),
                    role: Some("admin".to_string()),
                }),
                "outsider" => Ok(VerifiedIdentity {
                    uid: "u2".to_string(),
                    email: "u2@other.com".to_string(),
                    role: None,
                }),
                _ => Err(AuthError::Authentication),
            }
        }
    }

    fn app(limit: u32) -> Router {
        let state = Arc::new(AppState {
            gate: IdentityGate::new(
                Arc::new(TokenMapVerifier),
                GateConfig::new(vec!["allowed.com".to_string()]),
            ),
            service: MfaService::new(
                Arc::new(FakeEngine),
                Arc::new(MemoryCredentialStore::default()),
                Arc::new(MemoryChallengeStore::default()),
            ),
            limiter: Arc::new(CountingLimiter::new(limit)),
        });

        let (router, _openapi) = crate::api::router().split_for_parts();
        router.layer(Extension(state))
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let app = app(100);
        let response = app
            .oneshot(request("POST", "/v1/mfa/register/options", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disallowed_domain_is_forbidden_on_every_route() {
        let routes = [
            ("POST", "/v1/mfa/register/options", None),
            ("POST", "/v1/mfa/authenticate/options", None),
            ("GET", "/v1/mfa/devices", None),
            (
                "POST",
                "/v1/mfa/register/verify",
                Some(json!({ "response": {} })),
            ),
            (
                "POST",
                "/v1/mfa/authenticate/verify",
                Some(json!({ "response": {} })),
            ),
        ];
        for (method, uri, body) in routes {
            let response = app(100)
                .oneshot(request(method, uri, Some("outsider"), body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn rate_limit_breach_is_429() {
        let app = app(2);
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("POST", "/v1/mfa/authenticate/options", Some("user"), None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .oneshot(request("POST", "/v1/mfa/authenticate/options", Some("user"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = json_body(response).await;
        assert_eq!(body["error"], "Too many requests");
    }

    #[tokio::test]
    async fn no_devices_is_a_soft_success() {
        let response = app(100)
            .oneshot(request("POST", "/v1/mfa/authenticate/options", Some("user"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["error"], "no_registered_devices");
        assert!(body["options"].is_null());
    }

    #[tokio::test]
    async fn register_then_authenticate_then_replay_fails_generically() {
        let app = app(100);

        let response = app
            .clone()
            .oneshot(request("POST", "/v1/mfa/register/options", Some("user"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["options"]["challenge"].is_string());

        let attestation = json!({
            "response": { "credentialId": [1, 2, 3], "signCount": 0 },
            "deviceName": "Laptop",
        });
        let response = app
            .clone()
            .oneshot(request("POST", "/v1/mfa/register/verify", Some("user"), Some(attestation)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["verified"], true);

        // Options now carry exactly the enrolled credential.
        let response = app
            .clone()
            .oneshot(request("POST", "/v1/mfa/authenticate/options", Some("user"), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        let allowed = body["options"]["allowCredentials"].as_array().unwrap();
        assert_eq!(allowed.len(), 1);

        let assertion = json!({ "response": { "credentialId": [1, 2, 3], "signCount": 1 } });
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/v1/mfa/authenticate/verify",
                Some("user"),
                Some(assertion.clone()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Same assertion again: generic failure, no challenge detail.
        let response = app
            .oneshot(request("POST", "/v1/mfa/authenticate/verify", Some("user"), Some(assertion)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Verification failed");
    }

    #[tokio::test]
    async fn revoke_requires_the_admin_role() {
        let body = json!({ "targetUid": "u1" });
        let response = app(100)
            .oneshot(request("POST", "/v1/mfa/revoke", Some("user"), Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app(100)
            .oneshot(request("POST", "/v1/mfa/revoke", Some("admin"), Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["revoked"], 0);
    }

    #[tokio::test]
    async fn devices_lists_enrolled_credentials() {
        let app = app(100);

        let response = app
            .clone()
            .oneshot(request("GET", "/v1/mfa/devices", Some("user"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["devices"].as_array().unwrap().len(), 0);

        app.clone()
            .oneshot(request("POST", "/v1/mfa/register/options", Some("user"), None))
            .await
            .unwrap();
        let attestation = json!({
            "response": { "credentialId": [9], "signCount": 0 },
            "deviceName": "Phone",
        });
        app.clone()
            .oneshot(request("POST", "/v1/mfa/register/verify", Some("user"), Some(attestation)))
            .await
            .unwrap();

        let response = app
            .oneshot(request("GET", "/v1/mfa/devices", Some("user"), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["devices"][0]["deviceName"], "Phone");
        assert_eq!(body["devices"][0]["credentialId"], base64url::encode(&[9]));
    }
}
