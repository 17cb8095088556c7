use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod metrics;
pub mod middleware;
pub mod resale;
pub mod state;
pub mod tickets;
pub mod webhooks;

pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Bearer token required
    let authenticated = Router::new()
        .route("/v1/events/{event_id}/tickets", post(tickets::reserve_ticket))
        .route("/v1/tickets/{id}", get(tickets::get_ticket))
        .route("/v1/tickets/{id}/checkout", post(tickets::begin_checkout))
        .route("/v1/payments/{reference}/verify", get(tickets::verify_payment))
        .route("/v1/check-in", post(tickets::check_in))
        .route(
            "/v1/tickets/{id}/resale",
            post(resale::list_for_resale).delete(resale::cancel_listing),
        )
        .route("/v1/tickets/{id}/resale/checkout", post(resale::begin_resale_checkout))
        .route("/v1/tickets/{id}/bids", get(resale::list_bids).post(resale::place_bid))
        .route("/v1/tickets/{id}/bids/{bid_id}/accept", post(resale::accept_bid))
        .route("/v1/tickets/{id}/bids/{bid_id}/reject", post(resale::reject_bid))
        .route("/v1/tickets/{id}/bids/{bid_id}/withdraw", post(resale::withdraw_bid))
        .route("/v1/resale/payments/{reference}/verify", get(resale::verify_resale_payment))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let public = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/v1/events/{event_id}/price", get(tickets::quote_price))
        .route("/v1/webhooks/payments", post(webhooks::handle_payment_webhook));

    let mut router = Router::new()
        .merge(authenticated)
        .merge(public)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Needs ConnectInfo, which only the real listener provides
    if state.redis.is_some() {
        router = router.layer(from_fn_with_state(state.clone(), middleware::rate_limit_middleware));
    }

    router.with_state(state)
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
