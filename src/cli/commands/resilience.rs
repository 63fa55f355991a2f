use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

use crate::breaker::CircuitBreakerConfig;
use crate::rate_limit::RateLimitProfile;

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_DB_FAILURE_THRESHOLD: &str = "db-failure-threshold";
pub const ARG_DB_OPEN_SECONDS: &str = "db-open-seconds";
pub const ARG_PAYMENT_FAILURE_THRESHOLD: &str = "payment-failure-threshold";
pub const ARG_PAYMENT_OPEN_SECONDS: &str = "payment-open-seconds";
pub const ARG_AUTH_RATE_LIMIT: &str = "auth-rate-limit";
pub const ARG_API_RATE_LIMIT: &str = "api-rate-limit";
pub const ARG_RATE_WINDOW_SECONDS: &str = "rate-window-seconds";

#[derive(Debug)]
pub struct Options {
    pub redis_url: Option<String>,
    pub database_breaker: CircuitBreakerConfig,
    pub payment_breaker: CircuitBreakerConfig,
    pub auth_rate: RateLimitProfile,
    pub api_rate: RateLimitProfile,
}

impl Options {
    /// # Errors
    /// Returns an error if the arguments are inconsistent.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let number = |name: &str, default: u64| matches.get_one::<u64>(name).copied().unwrap_or(default);
        let count = |name: &str, default: u32| matches.get_one::<u32>(name).copied().unwrap_or(default);

        let window = Duration::from_secs(number(ARG_RATE_WINDOW_SECONDS, 60));
        if window.is_zero() {
            anyhow::bail!("--{ARG_RATE_WINDOW_SECONDS} must be greater than zero");
        }

        Ok(Self {
            redis_url: matches.get_one::<String>(ARG_REDIS_URL).cloned(),
            database_breaker: CircuitBreakerConfig::new(
                count(ARG_DB_FAILURE_THRESHOLD, 5),
                Duration::from_secs(number(ARG_DB_OPEN_SECONDS, 30)),
            ),
            payment_breaker: CircuitBreakerConfig::new(
                count(ARG_PAYMENT_FAILURE_THRESHOLD, 3),
                Duration::from_secs(number(ARG_PAYMENT_OPEN_SECONDS, 60)),
            ),
            auth_rate: RateLimitProfile::new("auth", count(ARG_AUTH_RATE_LIMIT, 5), window),
            api_rate: RateLimitProfile::new("api", count(ARG_API_RATE_LIMIT, 100), window),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = command.arg(
        Arg::new(ARG_REDIS_URL)
            .long(ARG_REDIS_URL)
            .help("Redis URL for shared rate limit counters; limiting is disabled without it")
            .env("COMANDA_REDIS_URL"),
    );
    let command = with_breaker_args(command);
    with_rate_limit_args(command)
}

fn with_breaker_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DB_FAILURE_THRESHOLD)
                .long(ARG_DB_FAILURE_THRESHOLD)
                .help("Consecutive database failures before the breaker opens")
                .env("COMANDA_DB_FAILURE_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_DB_OPEN_SECONDS)
                .long(ARG_DB_OPEN_SECONDS)
                .help("Seconds the database breaker stays open")
                .env("COMANDA_DB_OPEN_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_PAYMENT_FAILURE_THRESHOLD)
                .long(ARG_PAYMENT_FAILURE_THRESHOLD)
                .help("Consecutive payment failures before the breaker opens")
                .env("COMANDA_PAYMENT_FAILURE_THRESHOLD")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_PAYMENT_OPEN_SECONDS)
                .long(ARG_PAYMENT_OPEN_SECONDS)
                .help("Seconds the payment breaker stays open")
                .env("COMANDA_PAYMENT_OPEN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_AUTH_RATE_LIMIT)
                .long(ARG_AUTH_RATE_LIMIT)
                .help("Requests per window allowed on /api/auth/*")
                .env("COMANDA_AUTH_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_API_RATE_LIMIT)
                .long(ARG_API_RATE_LIMIT)
                .help("Requests per window allowed on the rest of /api/*")
                .env("COMANDA_API_RATE_LIMIT")
                .default_value("100")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_WINDOW_SECONDS)
                .long(ARG_RATE_WINDOW_SECONDS)
                .help("Sliding window length in seconds")
                .env("COMANDA_RATE_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}
