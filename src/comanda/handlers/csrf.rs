use axum::{Json, extract::State};

use crate::authorize::CurrentSession;
use crate::comanda::AppState;
use crate::csrf::CsrfToken;
use crate::error::{ErrorEnvelope, GuardError};

#[utoipa::path(
    get,
    path = "/api/csrf",
    responses(
        (status = 200, description = "Token bound to the current user", body = CsrfToken),
        (status = 303, description = "Redirect to /login without a session"),
        (status = 500, description = "Token could not be generated", body = ErrorEnvelope)
    ),
    tag = "csrf"
)]
pub async fn csrf_token(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<CsrfToken>, GuardError> {
    state.auth.csrf().issue(Some(&session)).map(Json)
}
