#![allow(dead_code)]

use admit_catalog::{DynamicPricingPolicy, EventListing, EventStatus, ResalePolicy, TicketCategory};
use admit_core::memory::{InMemoryStore, RecordingNotificationSink};
use admit_core::{SandboxGateway, Ticket, TicketingRules};
use admit_ticket::{ReserveRequest, TicketingContext, TicketingService};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub const ORGANIZER: &str = "organizer-1";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<SandboxGateway>,
    pub notifier: Arc<RecordingNotificationSink>,
    pub service: TicketingService,
    pub event_id: Uuid,
}

/// Published event one week out: base price 5000, capacity 100,
/// plus a "Regular" category at 1000 limited to 2 seats.
pub fn sample_event() -> EventListing {
    let starts_at = Utc::now() + Duration::days(7);
    EventListing {
        id: Uuid::new_v4(),
        organizer_user_id: ORGANIZER.to_string(),
        title: "Lagos Jazz Night".to_string(),
        status: EventStatus::Published,
        starts_at,
        ends_at: starts_at + Duration::hours(4),
        is_free: false,
        base_price_naira: 5000,
        capacity: Some(100),
        categories: vec![TicketCategory {
            name: "Regular".to_string(),
            price_naira: 1000,
            capacity: Some(2),
        }],
        currency: "NGN".to_string(),
        pricing: DynamicPricingPolicy::default(),
        resale: ResalePolicy::default(),
    }
}

pub fn harness() -> Harness {
    harness_with(TicketingRules::default(), sample_event())
}

pub fn harness_with(rules: TicketingRules, event: EventListing) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(SandboxGateway::new("sk_test_secret"));
    let notifier = Arc::new(RecordingNotificationSink::new());
    let event_id = event.id;
    store.put_event(event);

    let ctx = TicketingContext::in_memory(store.clone(), gateway.clone(), notifier.clone(), rules);
    Harness {
        store,
        gateway,
        notifier,
        service: TicketingService::new(ctx),
        event_id,
    }
}

pub fn email(user: &str) -> String {
    format!("{}@example.com", user)
}

pub fn reserve_request(h: &Harness, buyer: &str, quantity: i32, category: Option<&str>) -> ReserveRequest {
    ReserveRequest {
        event_id: h.event_id,
        buyer_user_id: buyer.to_string(),
        quantity,
        category: category.map(str::to_string),
    }
}

/// Reserve, check out and verify: a paid base-price ticket for `buyer`.
pub async fn paid_ticket(h: &Harness, buyer: &str, quantity: i32) -> Ticket {
    let ticket = h
        .service
        .reserve_ticket(reserve_request(h, buyer, quantity, None))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(ticket.id, buyer, &email(buyer), None)
        .await
        .unwrap();
    h.service
        .verify_purchase(&attempt.reference, buyer)
        .await
        .unwrap()
        .ticket
}

/// A `charge.success` webhook body as the gateway would send it.
pub fn charge_success_body(reference: &str, amount_minor_units: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event": "charge.success",
        "data": {
            "reference": reference,
            "status": "success",
            "amount": amount_minor_units,
            "currency": "NGN",
        }
    }))
    .unwrap()
}
