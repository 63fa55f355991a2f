use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use crate::authorize::CurrentSession;
use crate::comanda::AppState;
use crate::error::{ErrorEnvelope, GuardError};

#[utoipa::path(
    post,
    path = "/api/customers/{id}/delete",
    params(("id" = String, Path, description = "Customer id")),
    responses(
        (status = 204, description = "Customer deleted"),
        (status = 404, description = "No such customer"),
        (status = 403, description = "Missing or invalid CSRF token", body = ErrorEnvelope),
        (status = 502, description = "Database call failed", body = ErrorEnvelope),
        (status = 503, description = "Database breaker is open", body = ErrorEnvelope)
    ),
    tag = "customers"
)]
pub async fn delete_customer(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> Result<StatusCode, GuardError> {
    let customers = state.customers.clone();
    let deleted = state
        .database
        .execute(|| async move { customers.delete(&id).await })
        .await?;

    if deleted {
        info!(by = %session.user_id, "Customer deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}
