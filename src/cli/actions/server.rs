use crate::api::{self, GatewayConfig};
use anyhow::Result;
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub origin: String,
    pub token_endpoint: Url,
    pub allowed_domains: Vec<String>,
    pub challenge_ttl_seconds: u32,
    pub rate_limit_window_seconds: u32,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!(
        "starting gateway for origin {} with {} allowed domain(s)",
        args.origin,
        args.allowed_domains.len()
    );

    let config = GatewayConfig::new(args.origin, args.token_endpoint, args.allowed_domains)
        .with_challenge_ttl_seconds(args.challenge_ttl_seconds)
        .with_rate_limit_window_seconds(args.rate_limit_window_seconds);

    api::new(args.port, args.dsn, config).await
}
