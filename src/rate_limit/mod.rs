//! Sliding-window rate limiting keyed by client identity.
//!
//! Counters live in Redis so every instance sees the same window. When Redis is
//! not configured or cannot be reached the limiter is built fail-open: it logs
//! a warning and allows every request. Errors at check time also allow.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::Clock;

mod middleware;
mod store;

pub use middleware::{
    HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, client_key, enforce, extract_client_ip,
};

use store::{MemoryWindowStore, RedisWindowStore, WindowCount, WindowStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitProfile {
    name: String,
    limit: u32,
    window: Duration,
}

impl RateLimitProfile {
    /// A limit of zero is raised to one.
    pub fn new(name: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            name: name.into(),
            limit: limit.max(1),
            window,
        }
    }

    /// Strict profile for authentication endpoints.
    #[must_use]
    pub fn auth() -> Self {
        Self::new("auth", 5, Duration::from_secs(60))
    }

    /// Lenient profile for the rest of the API.
    #[must_use]
    pub fn api() -> Self {
        Self::new("api", 100, Duration::from_secs(60))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix milliseconds at which the oldest counted request leaves the window.
    pub reset_at: i64,
}

#[derive(Debug)]
pub struct RateLimiter {
    profile: RateLimitProfile,
    store: WindowStore,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Build a limiter backed by Redis, falling back to fail-open when the
    /// store is missing or unreachable.
    pub async fn connect(
        profile: RateLimitProfile,
        redis_url: Option<&str>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let Some(url) = redis_url.filter(|url| !url.trim().is_empty()) else {
            warn!(
                profile = profile.name(),
                "No redis url configured, rate limiting disabled (fail-open)"
            );
            return Self::disabled(profile, clock);
        };

        match RedisWindowStore::connect(url).await {
            Ok(store) => {
                info!(profile = profile.name(), "Rate limiter connected to redis");
                Self {
                    profile,
                    store: WindowStore::Shared(store),
                    clock,
                }
            }
            Err(err) => {
                warn!(
                    profile = profile.name(),
                    "Redis unavailable, rate limiting disabled (fail-open): {err:#}"
                );
                Self::disabled(profile, clock)
            }
        }
    }

    /// Per-process counters.
    pub fn in_memory(profile: RateLimitProfile, clock: Arc<dyn Clock>) -> Self {
        Self {
            profile,
            store: WindowStore::Local(MemoryWindowStore::default()),
            clock,
        }
    }

    /// Allows everything.
    pub fn disabled(profile: RateLimitProfile, clock: Arc<dyn Clock>) -> Self {
        Self {
            profile,
            store: WindowStore::Disabled,
            clock,
        }
    }

    #[must_use]
    pub fn profile(&self) -> &RateLimitProfile {
        &self.profile
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self.store, WindowStore::Disabled)
    }

    fn key(&self, key: &str) -> String {
        format!("ratelimit:{}:{key}", self.profile.name)
    }

    fn decide(&self, counted: WindowCount) -> RateLimitDecision {
        let limit = u64::from(self.profile.limit);
        RateLimitDecision {
            allowed: counted.count <= limit,
            remaining: u32::try_from(limit.saturating_sub(counted.count)).unwrap_or(0),
            reset_at: counted.oldest.saturating_add(self.profile.window_ms()),
        }
    }

    fn allow_all(&self, now: i64) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            remaining: self.profile.limit,
            reset_at: now.saturating_add(self.profile.window_ms()),
        }
    }

    /// Milliseconds until `decision` resets, on this limiter's clock.
    #[must_use]
    pub fn retry_after_ms(&self, decision: &RateLimitDecision) -> i64 {
        decision
            .reset_at
            .saturating_sub(self.clock.now_millis())
            .max(0)
    }

    pub(crate) fn fail_open(&self) -> RateLimitDecision {
        self.allow_all(self.clock.now_millis())
    }

    /// Record one request for `key` and decide whether it may proceed.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_millis();
        let window_ms = self.profile.window_ms();
        match &self.store {
            WindowStore::Shared(store) => match store.hit(&self.key(key), now, window_ms).await {
                Ok(counted) => self.decide(counted),
                Err(err) => {
                    warn!(
                        profile = self.profile.name(),
                        "Rate limit store error, allowing request: {err:#}"
                    );
                    self.allow_all(now)
                }
            },
            WindowStore::Local(store) => self.decide(store.hit(&self.key(key), now, window_ms)),
            WindowStore::Disabled => self.allow_all(now),
        }
    }
}
