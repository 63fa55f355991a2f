use std::sync::Arc;

use super::upstream::{CustomerRepository, PaymentGateway};
use crate::authorize::AuthGuard;
use crate::breaker::CircuitBreaker;
use crate::rate_limit::RateLimiter;

/// Shared handles built once at startup and cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthGuard>,
    pub database: Arc<CircuitBreaker>,
    pub payment: Arc<CircuitBreaker>,
    pub auth_limiter: Arc<RateLimiter>,
    pub api_limiter: Arc<RateLimiter>,
    pub payments: Arc<dyn PaymentGateway>,
    pub customers: Arc<dyn CustomerRepository>,
    /// Registers `GET /api/auth/dev-login`.
    pub dev_login: bool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("auth", &self.auth)
            .field("database", &self.database.snapshot())
            .field("payment", &self.payment.snapshot())
            .field("auth_limiter", &self.auth_limiter.profile())
            .field("api_limiter", &self.api_limiter.profile())
            .field("dev_login", &self.dev_login)
            .finish_non_exhaustive()
    }
}
