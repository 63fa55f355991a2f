use axum::{Json, extract::State};
use tracing::info;

use crate::authorize::CurrentSession;
use crate::comanda::AppState;
use crate::comanda::upstream::{PaymentReceipt, PaymentRequest};
use crate::error::{ErrorEnvelope, GuardError};

#[utoipa::path(
    post,
    path = "/api/payment",
    request_body = PaymentRequest,
    responses(
        (status = 200, description = "Charge accepted by the provider", body = PaymentReceipt),
        (status = 403, description = "Missing or invalid CSRF token", body = ErrorEnvelope),
        (status = 502, description = "Payment provider failed", body = ErrorEnvelope),
        (status = 503, description = "Payment breaker is open", body = ErrorEnvelope)
    ),
    tag = "payment"
)]
pub async fn charge(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(request): Json<PaymentRequest>,
) -> Result<Json<PaymentReceipt>, GuardError> {
    let payments = state.payments.clone();
    let receipt = state
        .payment
        .execute(|| async move { payments.charge(&request).await })
        .await?;

    info!(
        user = %session.user_id,
        payment_id = %receipt.payment_id,
        "Payment accepted"
    );
    Ok(Json(receipt))
}
