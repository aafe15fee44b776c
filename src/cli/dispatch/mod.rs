//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let origin = matches
        .get_one::<String>("origin")
        .cloned()
        .context("missing required argument: --origin")?;
    let token_endpoint = matches
        .get_one::<String>("token-endpoint")
        .context("missing required argument: --token-endpoint")?;
    let token_endpoint = Url::parse(token_endpoint)
        .with_context(|| format!("invalid token endpoint: {token_endpoint}"))?;
    let allowed_domains: Vec<String> = matches
        .get_many::<String>("allowed-domains")
        .context("missing required argument: --allowed-domains")?
        .cloned()
        .collect();
    let challenge_ttl_seconds = matches
        .get_one::<u32>("challenge-ttl")
        .copied()
        .unwrap_or(120);
    let rate_limit_window_seconds = matches
        .get_one::<u32>("rate-limit-window")
        .copied()
        .unwrap_or(60);

    Ok(Action::Server(Args {
        port,
        dsn,
        origin,
        token_endpoint,
        allowed_domains,
        challenge_ttl_seconds,
        rate_limit_window_seconds,
    }))
}
