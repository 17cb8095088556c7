use admit_ticket::{CheckInResult, PriceView, ReconcileOutcome, ReserveRequest};
use admit_core::{PaymentAttempt, Ticket};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReserveTicketRequest {
    pub quantity: i32,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    pub category: Option<String>,
}

/// Body for both primary and resale checkout.
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutBody {
    /// Falls back to the email in the bearer token.
    pub email: Option<String>,
    pub callback_url: Option<String>,
}

impl CheckoutBody {
    pub(crate) fn email_for(&self, claims: &Claims) -> String {
        self.email
            .clone()
            .or_else(|| claims.email.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub code: String,
    pub event_id: Option<Uuid>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/events/{event_id}/tickets
/// Reserve seats; the ticket stays pending until payment is verified
pub async fn reserve_ticket(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(event_id): Path<Uuid>,
    Json(payload): Json<ReserveTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>), AppError> {
    let ticket = state
        .ticketing
        .reserve_ticket(ReserveRequest {
            event_id,
            buyer_user_id: claims.sub,
            quantity: payload.quantity,
            category: payload.category,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(ticket)))
}

/// GET /v1/events/{event_id}/price
pub async fn quote_price(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<PriceView>, AppError> {
    let view = state
        .ticketing
        .quote_price(event_id, query.category.as_deref())
        .await?;
    Ok(Json(view))
}

/// GET /v1/tickets/{id}
pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state.ticketing.get_ticket(ticket_id, &claims.sub).await?;
    Ok(Json(ticket))
}

/// POST /v1/tickets/{id}/checkout
/// Open a gateway checkout for a pending ticket
pub async fn begin_checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<CheckoutBody>,
) -> Result<Json<PaymentAttempt>, AppError> {
    let email = payload.email_for(&claims);
    let attempt = state
        .ticketing
        .begin_purchase_checkout(ticket_id, &claims.sub, &email, payload.callback_url)
        .await?;
    Ok(Json(attempt))
}

/// GET /v1/payments/{reference}/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(reference): Path<String>,
) -> Result<Json<ReconcileOutcome>, AppError> {
    let result = state.ticketing.verify_purchase(&reference, &claims.sub).await;
    state.metrics.observe_reconcile("ticket_purchase", &result);
    Ok(Json(result?))
}

/// POST /v1/check-in
/// Organizer scans a ticket code or barcode at the gate
pub async fn check_in(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CheckInRequest>,
) -> Result<Json<CheckInResult>, AppError> {
    let result = state
        .ticketing
        .check_in(&payload.code, payload.event_id, &claims.sub)
        .await?;
    Ok(Json(result))
}
