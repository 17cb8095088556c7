use admit_ticket::WebhookAck;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};

use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// POST /v1/webhooks/payments
/// Gateway callbacks. The signature covers the raw body, so it is read unparsed.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());

    let result = state.ticketing.handle_gateway_event(&body, signature).await;
    state.metrics.observe_webhook(&result);
    Ok(Json(result?))
}
