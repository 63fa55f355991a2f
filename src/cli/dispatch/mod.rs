//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to the action to run, such as starting the
//! server with its full configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PAYMENT_URL, ARG_PORT, resilience, session};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let payment_url = matches
        .get_one::<String>(ARG_PAYMENT_URL)
        .cloned()
        .context("missing required argument: --payment-url")?;

    let session_opts = session::Options::parse(matches)?;
    let resilience_opts = resilience::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        payment_url,
        session_secret: session_opts.secret,
        insecure_cookies: session_opts.insecure_cookies,
        dev_login: session_opts.dev_login,
        deny_unmatched: session_opts.deny_unmatched,
        redis_url: resilience_opts.redis_url,
        database_breaker: resilience_opts.database_breaker,
        payment_breaker: resilience_opts.payment_breaker,
        auth_rate: resilience_opts.auth_rate,
        api_rate: resilience_opts.api_rate,
    }))
}
