use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

use crate::api::handlers::AppState;
use crate::gate::{self, GateConfig, IdentityGate, token::HttpTokenVerifier};
use crate::mfa::engine::WebauthnEngine;
use crate::mfa::rate_limit::{PgRateLimiter, RateLimitConfig};
use crate::mfa::service::MfaService;
use crate::mfa::store::{PgChallengeStore, PgCredentialStore};

pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Server configuration resolved from the CLI.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    origin: String,
    token_endpoint: Url,
    allowed_domains: Vec<String>,
    challenge_ttl_seconds: u32,
    rate_limit_window_seconds: u32,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(origin: String, token_endpoint: Url, allowed_domains: Vec<String>) -> Self {
        // Ensure origin does not have a trailing slash
        let origin = origin.trim_end_matches('/').to_string();
        Self {
            origin,
            token_endpoint,
            allowed_domains,
            challenge_ttl_seconds: 120,
            rate_limit_window_seconds: 60,
        }
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: u32) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_rate_limit_window_seconds(mut self, seconds: u32) -> Self {
        self.rate_limit_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Relying party id is the origin's host.
    pub fn relying_party_id(&self) -> Result<String> {
        let parsed = Url::parse(&self.origin)
            .with_context(|| format!("Invalid origin: {}", self.origin))?;
        parsed
            .host_str()
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("Origin must include a valid host: {}", self.origin))
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, config: GatewayConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let http_client = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .context("Failed to build HTTP client")?;

    let engine = WebauthnEngine::new(
        &config.relying_party_id()?,
        config.origin(),
        env!("CARGO_PKG_NAME"),
    )?;

    let state = Arc::new(AppState {
        gate: IdentityGate::new(
            Arc::new(HttpTokenVerifier::new(
                http_client,
                config.token_endpoint.clone(),
            )),
            GateConfig::new(config.allowed_domains.clone()),
        ),
        service: MfaService::new(
            Arc::new(engine),
            Arc::new(PgCredentialStore::new(pool.clone())),
            Arc::new(PgChallengeStore::new(pool.clone())),
        )
        .with_challenge_ttl(chrono::Duration::seconds(i64::from(
            config.challenge_ttl_seconds,
        ))),
        limiter: Arc::new(PgRateLimiter::new(
            pool.clone(),
            RateLimitConfig {
                window: Duration::from_secs(u64::from(config.rate_limit_window_seconds)),
                ..RateLimitConfig::default()
            },
        )),
    });

    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(gate::token::ID_TOKEN_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(origin_header(config.origin())?))
        .allow_credentials(true);

    let (router, _openapi) = router().split_for_parts();
    let app = router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(DefaultBodyLimit::max(gate::MAX_BODY_BYTES))
            .layer(Extension(state))
            .layer(Extension(pool)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn origin_header(origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(origin).with_context(|| format!("Invalid origin: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Origin must include a valid host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let value = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&value).context("Failed to build origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig::new(
            "https://app.example.com/".to_string(),
            Url::parse("https://issuer.example.com/v1/introspect").unwrap(),
            vec!["example.com".to_string()],
        )
    }

    #[test]
    fn origin_is_normalized_and_rp_id_is_the_host() {
        let config = config();
        assert_eq!(config.origin(), "https://app.example.com");
        assert_eq!(config.relying_party_id().unwrap(), "app.example.com");
    }

    #[test]
    fn challenge_ttl_and_rate_window_are_overridable() {
        let config = config();
        assert_eq!(config.challenge_ttl_seconds, 120);
        assert_eq!(config.rate_limit_window_seconds, 60);

        let config = self::config()
            .with_challenge_ttl_seconds(90)
            .with_rate_limit_window_seconds(30);
        assert_eq!(config.challenge_ttl_seconds, 90);
        assert_eq!(config.rate_limit_window_seconds, 30);
    }

    #[test]
    fn origin_header_keeps_explicit_port() {
        let header = origin_header("http://localhost:5173").unwrap();
        assert_eq!(header, HeaderValue::from_static("http://localhost:5173"));
    }
}
