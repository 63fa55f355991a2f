//! Axum middleware applying a [`RateLimiter`] per client IP.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

use super::{RateLimitDecision, RateLimiter};
use crate::error::GuardError;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Extract a client IP from common proxy headers.
#[must_use]
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[must_use]
pub fn client_key(headers: &HeaderMap) -> String {
    extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string())
}

/// Count the request and reject it with `429` once the window is full.
///
/// The check runs on its own task so the hit is recorded even if the client
/// disconnects mid-request.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(request.headers());
    let task_limiter = Arc::clone(&limiter);
    let task_key = key.clone();
    let decision = match tokio::spawn(async move { task_limiter.check(&task_key).await }).await
    {
        Ok(decision) => decision,
        Err(err) => {
            warn!("Rate limit check task failed, allowing request: {err}");
            limiter.fail_open()
        }
    };

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        warn!(
            client_ip = %key,
            profile = limiter.profile().name(),
            "Rate limit exceeded"
        );
        GuardError::RateLimitExceeded {
            remaining: decision.remaining,
            reset_at: decision.reset_at,
            retry_after_ms: limiter.retry_after_ms(&decision),
        }
        .into_response()
    };
    insert_headers(response.headers_mut(), limiter.profile().limit(), decision);
    response
}

fn insert_headers(headers: &mut HeaderMap, limit: u32, decision: RateLimitDecision) {
    let reset_seconds = (decision.reset_at + 999).div_euclid(1000);
    for (name, value) in [
        (HEADER_LIMIT, i64::from(limit)),
        (HEADER_REMAINING, i64::from(decision.remaining)),
        (HEADER_RESET, reset_seconds),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}
