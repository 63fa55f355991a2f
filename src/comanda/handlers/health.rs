use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::GIT_COMMIT_HASH;
use crate::breaker::{CircuitSnapshot, CircuitState};
use crate::comanda::AppState;

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    breakers: Vec<CircuitSnapshot>,
    rate_limiting: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up; breaker states are informational", body = Health)
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let breakers = vec![state.database.snapshot(), state.payment.snapshot()];
    for breaker in &breakers {
        if breaker.state != CircuitState::Closed {
            debug!("Breaker {} is {}", breaker.name, breaker.state);
        }
    }

    let degraded = state.auth_limiter.is_degraded() || state.api_limiter.is_degraded();
    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        breakers,
        rate_limiting: if degraded { "disabled" } else { "ok" }.to_string(),
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    (headers, Json(health))
}
