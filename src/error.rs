//! Error taxonomy for the authorization layer and its JSON envelope.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::breaker::BreakerError;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Token failures are absorbed into "no session" by the session layer.
    /// Kept for callers that answer with a status instead of a redirect.
    #[error("Session token is invalid or expired")]
    InvalidOrExpiredToken,

    #[error("Authentication required")]
    Unauthenticated,

    /// The route guard redirects to `/forbidden`; API callers may use this instead.
    #[error("Insufficient role for this resource")]
    InsufficientRole,

    #[error("Missing CSRF token")]
    CsrfMissing,

    #[error("Invalid CSRF token")]
    CsrfInvalid,

    /// A breaker rejected the call without invoking the dependency.
    #[error("Service temporarily unavailable")]
    CircuitOpen {
        dependency: String,
        retry_after_ms: i64,
    },

    /// `reset_at` is unix ms; `retry_after_ms` is measured on the limiter's clock.
    #[error("Too many requests")]
    RateLimitExceeded {
        remaining: u32,
        reset_at: i64,
        retry_after_ms: i64,
    },

    /// The wrapped dependency failed; the original error is kept for logging.
    #[error("Upstream dependency failed")]
    UpstreamFailure(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<i64>,
}

impl ErrorEnvelope {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                remaining: None,
                reset_at: None,
            },
        }
    }
}

impl GuardError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidOrExpiredToken | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InsufficientRole | Self::CsrfMissing | Self::CsrfInvalid => StatusCode::FORBIDDEN,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code. Both CSRF variants share one code so a
    /// client cannot probe which check failed.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidOrExpiredToken => "INVALID_TOKEN",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InsufficientRole => "FORBIDDEN",
            Self::CsrfMissing | Self::CsrfInvalid => "CSRF_INVALID",
            Self::CircuitOpen { .. } => "SERVICE_UNAVAILABLE",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        let message = match self {
            Self::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        let (remaining, reset_at) = match self {
            Self::RateLimitExceeded {
                remaining,
                reset_at,
                ..
            } => (Some(*remaining), Some(*reset_at)),
            _ => (None, None),
        };
        let mut envelope = ErrorEnvelope::new(self.code(), message);
        envelope.error.remaining = remaining;
        envelope.error.reset_at = reset_at;
        envelope
    }

    fn retry_after_seconds(&self) -> Option<i64> {
        match self {
            Self::CircuitOpen { retry_after_ms, .. }
            | Self::RateLimitExceeded { retry_after_ms, .. } => Some(ceil_seconds(*retry_after_ms)),
            _ => None,
        }
    }
}

fn ceil_seconds(millis: i64) -> i64 {
    (millis.max(0) + 999) / 1000
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        match &self {
            Self::UpstreamFailure(err) => error!("Upstream dependency failed: {err:#}"),
            Self::Internal(msg) => error!("Internal error: {msg}"),
            _ => {}
        }

        let mut headers = HeaderMap::new();
        if let Some(seconds) = self.retry_after_seconds()
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            headers.insert(RETRY_AFTER, value);
        }

        (self.status(), headers, Json(self.envelope())).into_response()
    }
}

impl From<BreakerError<anyhow::Error>> for GuardError {
    fn from(err: BreakerError<anyhow::Error>) -> Self {
        match err {
            BreakerError::Open {
                name,
                retry_after_ms,
            } => Self::CircuitOpen {
                dependency: name,
                retry_after_ms,
            },
            BreakerError::Upstream(err) => Self::UpstreamFailure(err),
        }
    }
}
