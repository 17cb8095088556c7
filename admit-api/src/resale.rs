use admit_core::{ResaleBid, Ticket};
use admit_ticket::{ListingRequest, ReconcileOutcome, ResaleCheckoutOutcome};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;
use crate::tickets::CheckoutBody;

#[derive(Debug, Deserialize)]
pub struct PlaceBidRequest {
    pub amount_naira: i64,
}

#[derive(Debug, Serialize)]
pub struct AcceptBidResponse {
    pub ticket: Ticket,
    pub bid: ResaleBid,
}

/// POST /v1/tickets/{id}/resale
pub async fn list_for_resale(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<ListingRequest>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state.ticketing.list_resale(ticket_id, &claims.sub, payload).await?;
    Ok(Json(ticket))
}

/// DELETE /v1/tickets/{id}/resale
pub async fn cancel_listing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state.ticketing.cancel_resale_listing(ticket_id, &claims.sub).await?;
    Ok(Json(ticket))
}

/// POST /v1/tickets/{id}/resale/checkout
/// Buy a listed ticket outright, or pay for an accepted bid
pub async fn begin_resale_checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<CheckoutBody>,
) -> Result<Json<ResaleCheckoutOutcome>, AppError> {
    let email = payload.email_for(&claims);
    let outcome = state
        .ticketing
        .begin_resale_checkout(ticket_id, &claims.sub, &email, payload.callback_url)
        .await?;
    Ok(Json(outcome))
}

/// GET /v1/tickets/{id}/bids
/// Seller sees every bid, a bidder sees their own
pub async fn list_bids(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<ResaleBid>>, AppError> {
    let bids = state.ticketing.list_bids(ticket_id, &claims.sub).await?;
    Ok(Json(bids))
}

/// POST /v1/tickets/{id}/bids
pub async fn place_bid(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<PlaceBidRequest>,
) -> Result<(StatusCode, Json<ResaleBid>), AppError> {
    let bid = state
        .ticketing
        .place_bid(ticket_id, &claims.sub, payload.amount_naira)
        .await?;
    Ok((StatusCode::CREATED, Json(bid)))
}

/// POST /v1/tickets/{id}/bids/{bid_id}/accept
pub async fn accept_bid(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((ticket_id, bid_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AcceptBidResponse>, AppError> {
    let (ticket, bid) = state.ticketing.accept_bid(ticket_id, &claims.sub, bid_id).await?;
    Ok(Json(AcceptBidResponse { ticket, bid }))
}

/// POST /v1/tickets/{id}/bids/{bid_id}/reject
pub async fn reject_bid(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((ticket_id, bid_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ResaleBid>, AppError> {
    let bid = state.ticketing.reject_bid(ticket_id, &claims.sub, bid_id).await?;
    Ok(Json(bid))
}

/// POST /v1/tickets/{id}/bids/{bid_id}/withdraw
pub async fn withdraw_bid(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((ticket_id, bid_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ResaleBid>, AppError> {
    let bid = state.ticketing.withdraw_bid(ticket_id, &claims.sub, bid_id).await?;
    Ok(Json(bid))
}

/// GET /v1/resale/payments/{reference}/verify
pub async fn verify_resale_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(reference): Path<String>,
) -> Result<Json<ReconcileOutcome>, AppError> {
    let result = state.ticketing.verify_resale_purchase(&reference, &claims.sub).await;
    state.metrics.observe_reconcile("ticket_resale_purchase", &result);
    Ok(Json(result?))
}
