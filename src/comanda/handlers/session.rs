//! Session endpoints under the public `/api/auth/` prefix.

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::authorize::CurrentSession;
use crate::comanda::AppState;
use crate::error::{ErrorEnvelope, GuardError};
use crate::session::{Session, roles};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: String,
    pub roles: Vec<String>,
    pub expires_at: i64,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user_id.clone(),
            roles: session.roles.iter().cloned().collect(),
            expires_at: session.expires_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(session: Option<CurrentSession>) -> Response {
    // A bad or expired cookie looks exactly like no cookie.
    match session {
        Some(CurrentSession(session)) => {
            (StatusCode::OK, Json(SessionResponse::from(&session))).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 204, description = "Session cookie cleared")
    ),
    tag = "auth"
)]
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    state.auth.sessions().logout(&mut headers);
    (StatusCode::NO_CONTENT, headers)
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DevLoginQuery {
    /// User id to sign in as.
    pub user: String,
    /// Comma separated role names, `customer` when omitted.
    pub roles: Option<String>,
}

/// Development-only sign in. Registered only when dev login is enabled.
#[utoipa::path(
    get,
    path = "/api/auth/dev-login",
    params(DevLoginQuery),
    responses(
        (status = 200, description = "Session issued", body = SessionResponse),
        (status = 400, description = "Missing user id", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn dev_login(
    State(state): State<AppState>,
    Query(query): Query<DevLoginQuery>,
) -> Result<Response, GuardError> {
    let user = query.user.trim();
    if user.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ErrorEnvelope::new("INVALID_REQUEST", "user is required")),
        )
            .into_response());
    }

    let mut requested: Vec<String> = query
        .roles
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect();
    if requested.is_empty() {
        requested.push(roles::CUSTOMER.to_string());
    }

    warn!(user = %user, "Issuing development session");
    let mut headers = HeaderMap::new();
    let session = state
        .auth
        .sessions()
        .login(&Session::new(user, requested), &mut headers)?;
    info!(user = %session.user_id, "Development session issued");

    Ok((StatusCode::OK, headers, Json(SessionResponse::from(&session))).into_response())
}
