use admit_catalog::{EventListing, EventStatus};
use admit_core::{
    AttemptStatus, BidStatus, FulfillmentStatus, PaymentAttempt, PaymentKind, ResaleBid, ResaleListing,
    ResaleStatus, StoreError, Ticket, TicketStatus,
};
use admit_shared::Masked;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub(crate) const TICKET_COLUMNS: &str = "id, event_id, category, buyer_user_id, organizer_user_id, quantity, \
    unit_price_naira, total_price_naira, currency, status, payment_provider, payment_reference, ticket_code, \
    barcode_value, occurrence_starts_at, occurrence_ends_at, paid_at, verified_at, cancelled_at, used_at, \
    expired_at, used_by_user_id, resold_from_ticket_id, resale_status, resale_price_naira, resale_quantity, \
    resale_allow_bids, resale_listed_at, resale_accepted_bid_id, resale_accepted_bid_expires_at, \
    resale_buyer_user_id, version, created_at, updated_at";

pub(crate) const BID_COLUMNS: &str = "id, ticket_id, event_id, seller_user_id, bidder_user_id, amount_naira, \
    status, created_at, responded_at, expires_at, paid_at";

pub(crate) const ATTEMPT_COLUMNS: &str = "id, reference, provider, kind, ticket_id, accepted_bid_id, status, \
    buyer_user_id, buyer_email, event_id, amount_minor_units, currency, authorization_url, access_code, \
    initialize_payload, verify_payload, fulfillment_status, fulfillment_ticket_id, failure_reason, fulfilled_at, \
    created_at, updated_at";

pub(crate) const EVENT_COLUMNS: &str = "id, organizer_user_id, title, status, starts_at, ends_at, is_free, \
    base_price_naira, capacity, categories, currency, pricing, resale";

fn corrupt(table: &str, column: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("{}.{} has unknown value '{}'", table, column, value))
}

#[derive(sqlx::FromRow)]
pub(crate) struct TicketRow {
    id: Uuid,
    event_id: Uuid,
    category: Option<String>,
    buyer_user_id: String,
    organizer_user_id: String,
    quantity: i32,
    unit_price_naira: i64,
    total_price_naira: i64,
    currency: String,
    status: String,
    payment_provider: Option<String>,
    payment_reference: Option<String>,
    ticket_code: String,
    barcode_value: String,
    occurrence_starts_at: Option<DateTime<Utc>>,
    occurrence_ends_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    used_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    used_by_user_id: Option<String>,
    resold_from_ticket_id: Option<Uuid>,
    resale_status: String,
    resale_price_naira: Option<i64>,
    resale_quantity: Option<i32>,
    resale_allow_bids: bool,
    resale_listed_at: Option<DateTime<Utc>>,
    resale_accepted_bid_id: Option<Uuid>,
    resale_accepted_bid_expires_at: Option<DateTime<Utc>>,
    resale_buyer_user_id: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = TicketStatus::parse(&row.status).ok_or_else(|| corrupt("tickets", "status", &row.status))?;
        let resale_status = ResaleStatus::parse(&row.resale_status)
            .ok_or_else(|| corrupt("tickets", "resale_status", &row.resale_status))?;

        Ok(Ticket {
            id: row.id,
            event_id: row.event_id,
            category: row.category,
            buyer_user_id: row.buyer_user_id,
            organizer_user_id: row.organizer_user_id,
            quantity: row.quantity,
            unit_price_naira: row.unit_price_naira,
            total_price_naira: row.total_price_naira,
            currency: row.currency,
            status,
            payment_provider: row.payment_provider,
            payment_reference: row.payment_reference,
            ticket_code: row.ticket_code,
            barcode_value: row.barcode_value,
            occurrence_starts_at: row.occurrence_starts_at,
            occurrence_ends_at: row.occurrence_ends_at,
            paid_at: row.paid_at,
            verified_at: row.verified_at,
            cancelled_at: row.cancelled_at,
            used_at: row.used_at,
            expired_at: row.expired_at,
            used_by_user_id: row.used_by_user_id,
            resold_from_ticket_id: row.resold_from_ticket_id,
            resale: ResaleListing {
                status: resale_status,
                price_naira: row.resale_price_naira,
                quantity: row.resale_quantity,
                allow_bids: row.resale_allow_bids,
                listed_at: row.resale_listed_at,
                accepted_bid_id: row.resale_accepted_bid_id,
                accepted_bid_expires_at: row.resale_accepted_bid_expires_at,
                buyer_user_id: row.resale_buyer_user_id,
            },
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct BidRow {
    id: Uuid,
    ticket_id: Uuid,
    event_id: Uuid,
    seller_user_id: String,
    bidder_user_id: String,
    amount_naira: i64,
    status: String,
    created_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<BidRow> for ResaleBid {
    type Error = StoreError;

    fn try_from(row: BidRow) -> Result<Self, Self::Error> {
        let status = BidStatus::parse(&row.status).ok_or_else(|| corrupt("resale_bids", "status", &row.status))?;
        Ok(ResaleBid {
            id: row.id,
            ticket_id: row.ticket_id,
            event_id: row.event_id,
            seller_user_id: row.seller_user_id,
            bidder_user_id: row.bidder_user_id,
            amount_naira: row.amount_naira,
            status,
            created_at: row.created_at,
            responded_at: row.responded_at,
            expires_at: row.expires_at,
            paid_at: row.paid_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AttemptRow {
    id: Uuid,
    reference: String,
    provider: String,
    kind: String,
    ticket_id: Uuid,
    accepted_bid_id: Option<Uuid>,
    status: String,
    buyer_user_id: String,
    buyer_email: Option<String>,
    event_id: Uuid,
    amount_minor_units: i64,
    currency: String,
    authorization_url: Option<String>,
    access_code: Option<String>,
    initialize_payload: Option<Value>,
    verify_payload: Option<Value>,
    fulfillment_status: String,
    fulfillment_ticket_id: Option<Uuid>,
    failure_reason: Option<String>,
    fulfilled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Column pair `(kind, accepted_bid_id)` for a payment kind; the ticket id is stored separately.
pub(crate) fn kind_columns(kind: &PaymentKind) -> (&'static str, Option<Uuid>) {
    match kind {
        PaymentKind::TicketPurchase { .. } => (kind.as_str(), None),
        PaymentKind::TicketResalePurchase { accepted_bid_id, .. } => (kind.as_str(), *accepted_bid_id),
    }
}

impl TryFrom<AttemptRow> for PaymentAttempt {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "ticket_purchase" => PaymentKind::TicketPurchase { ticket_id: row.ticket_id },
            "ticket_resale_purchase" => PaymentKind::TicketResalePurchase {
                source_ticket_id: row.ticket_id,
                accepted_bid_id: row.accepted_bid_id,
            },
            other => return Err(corrupt("payment_attempts", "kind", other)),
        };
        let status = AttemptStatus::parse(&row.status)
            .ok_or_else(|| corrupt("payment_attempts", "status", &row.status))?;
        let fulfillment_status = FulfillmentStatus::parse(&row.fulfillment_status)
            .ok_or_else(|| corrupt("payment_attempts", "fulfillment_status", &row.fulfillment_status))?;

        Ok(PaymentAttempt {
            id: row.id,
            reference: row.reference,
            provider: row.provider,
            kind,
            status,
            buyer_user_id: row.buyer_user_id,
            buyer_email: row.buyer_email.map(Masked::new),
            event_id: row.event_id,
            amount_minor_units: row.amount_minor_units,
            currency: row.currency,
            authorization_url: row.authorization_url,
            access_code: row.access_code,
            initialize_payload: row.initialize_payload,
            verify_payload: row.verify_payload,
            fulfillment_status,
            fulfillment_ticket_id: row.fulfillment_ticket_id,
            failure_reason: row.failure_reason,
            fulfilled_at: row.fulfilled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct EventRow {
    id: Uuid,
    organizer_user_id: String,
    title: String,
    status: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    is_free: bool,
    base_price_naira: i64,
    capacity: Option<i64>,
    categories: Value,
    currency: String,
    pricing: Option<Value>,
    resale: Option<Value>,
}

fn json_column<T: serde::de::DeserializeOwned + Default>(column: &str, value: Option<Value>) -> Result<T, StoreError> {
    match value {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v).map_err(|e| StoreError::Corrupt(format!("events.{}: {}", column, e))),
    }
}

impl TryFrom<EventRow> for EventListing {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let status = EventStatus::parse(&row.status).ok_or_else(|| corrupt("events", "status", &row.status))?;
        Ok(EventListing {
            id: row.id,
            organizer_user_id: row.organizer_user_id,
            title: row.title,
            status,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            is_free: row.is_free,
            base_price_naira: row.base_price_naira,
            capacity: row.capacity,
            categories: json_column("categories", Some(row.categories))?,
            currency: row.currency,
            pricing: json_column("pricing", row.pricing)?,
            resale: json_column("resale", row.resale)?,
        })
    }
}
