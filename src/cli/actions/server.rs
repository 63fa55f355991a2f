use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::authorize::{AuthGuard, RouteTable, UnmatchedPolicy};
use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::clock::{Clock, SystemClock};
use crate::comanda::{
    self, AppState,
    upstream::{HttpPaymentGateway, PgCustomerRepository},
};
use crate::csrf::CsrfGuard;
use crate::rate_limit::{RateLimitProfile, RateLimiter};
use crate::session::SessionManager;

const PAYMENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub payment_url: String,
    pub session_secret: SecretString,
    pub insecure_cookies: bool,
    pub dev_login: bool,
    pub deny_unmatched: bool,
    pub redis_url: Option<String>,
    pub database_breaker: CircuitBreakerConfig,
    pub payment_breaker: CircuitBreakerConfig,
    pub auth_rate: RateLimitProfile,
    pub api_rate: RateLimitProfile,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the secret is too weak, an upstream cannot be
/// configured, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if args.insecure_cookies {
        warn!("Session cookies are issued without the Secure attribute");
    }
    let sessions = SessionManager::new(&args.session_secret, clock.clone())
        .context("Invalid session secret")?
        .with_secure_cookies(!args.insecure_cookies);
    let csrf = CsrfGuard::new(&args.session_secret).context("Invalid session secret")?;

    let policy = if args.deny_unmatched {
        UnmatchedPolicy::Deny
    } else {
        UnmatchedPolicy::Allow
    };
    let routes = RouteTable::storefront().with_unmatched_policy(policy);

    let customers = PgCustomerRepository::connect_lazy(&args.dsn)?;
    let payments = HttpPaymentGateway::new(&args.payment_url, PAYMENT_TIMEOUT)?;

    let redis_url = args.redis_url.as_deref();
    let auth_limiter = RateLimiter::connect(args.auth_rate, redis_url, clock.clone()).await;
    let api_limiter = RateLimiter::connect(args.api_rate, redis_url, clock.clone()).await;

    if args.dev_login {
        warn!("Development login is enabled at /api/auth/dev-login");
    }

    let state = AppState {
        auth: Arc::new(AuthGuard::new(sessions, csrf, routes)),
        database: Arc::new(CircuitBreaker::new(
            "database",
            args.database_breaker,
            clock.clone(),
        )),
        payment: Arc::new(CircuitBreaker::new(
            "payment",
            args.payment_breaker,
            clock,
        )),
        auth_limiter: Arc::new(auth_limiter),
        api_limiter: Arc::new(api_limiter),
        payments: Arc::new(payments),
        customers: Arc::new(customers),
        dev_login: args.dev_login,
    };

    debug!("Application state: {:?}", state);

    comanda::new(args.port, state).await
}
