use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, builder::BoolishValueParser};
use secrecy::SecretString;

pub const ARG_SESSION_SECRET: &str = "session-secret";
pub const ARG_INSECURE_COOKIES: &str = "insecure-cookies";
pub const ARG_DEV_LOGIN: &str = "dev-login";
pub const ARG_DENY_UNMATCHED: &str = "deny-unmatched";

#[derive(Debug)]
pub struct Options {
    pub secret: SecretString,
    pub insecure_cookies: bool,
    pub dev_login: bool,
    pub deny_unmatched: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if the session secret is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_SESSION_SECRET)
            .cloned()
            .context("missing required argument: --session-secret")?;
        Ok(Self {
            secret: SecretString::from(secret),
            insecure_cookies: matches.get_flag(ARG_INSECURE_COOKIES),
            dev_login: matches.get_flag(ARG_DEV_LOGIN),
            deny_unmatched: matches.get_flag(ARG_DENY_UNMATCHED),
        })
    }
}

fn flag(name: &'static str, env: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .action(ArgAction::SetTrue)
        .value_parser(BoolishValueParser::new())
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_SECRET)
                .long(ARG_SESSION_SECRET)
                .help("Secret used to sign session and CSRF tokens (at least 32 bytes)")
                .env("COMANDA_SESSION_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(flag(
            ARG_INSECURE_COOKIES,
            "COMANDA_INSECURE_COOKIES",
            "Omit the Secure cookie attribute (plain HTTP development only)",
        ))
        .arg(flag(
            ARG_DEV_LOGIN,
            "COMANDA_DEV_LOGIN",
            "Expose GET /api/auth/dev-login for local testing",
        ))
        .arg(flag(
            ARG_DENY_UNMATCHED,
            "COMANDA_DENY_UNMATCHED",
            "Forbid authenticated requests to paths without a route rule",
        ))
}
