use admit_catalog::{CapacityLimits, CapacitySnapshot, EventListing};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{BidStatus, ResaleBid, Ticket};
use crate::payment::{AttemptStatus, GatewayCheckout, PaymentAttempt};
use crate::webhook::WebhookLogEntry;

/// Unique constraint guarding ticket codes. The code allocator retries on it.
pub const TICKET_CODE_CONSTRAINT: &str = "uq_tickets_ticket_code";
pub const TICKET_PAYMENT_REFERENCE_CONSTRAINT: &str = "uq_tickets_payment_reference";
pub const ATTEMPT_REFERENCE_CONSTRAINT: &str = "uq_payment_attempts_reference";
pub const OPEN_BID_CONSTRAINT: &str = "uq_resale_bids_open_per_bidder";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unique constraint violated: {constraint}")]
    Duplicate { constraint: String },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store error: {0}")]
    Backend(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn duplicate(constraint: &str) -> Self {
        StoreError::Duplicate {
            constraint: constraint.to_string(),
        }
    }

    pub fn is_duplicate_of(&self, name: &str) -> bool {
        matches!(self, StoreError::Duplicate { constraint } if constraint == name)
    }

    /// Worth retrying later (connection loss, pool exhaustion).
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Bid-ledger side effect committed together with a resale state change.
#[derive(Debug, Clone, PartialEq)]
pub enum BidEffect {
    None,
    /// Reject every open bid on the ticket (listing, delisting).
    RejectOpen,
    /// Persist `bid` as accepted (inserting it if new) and reject the other open bids.
    Accept { bid: ResaleBid },
    /// Move the accepted bid to a terminal status and nothing else.
    Release { bid_id: Uuid, status: BidStatus },
}

/// A compare-and-swap write of a ticket's resale sub-state.
#[derive(Debug, Clone)]
pub struct ResaleUpdate {
    /// Desired ticket state; its `version` is the one the caller read.
    pub ticket: Ticket,
    pub bids: BidEffect,
    pub at: DateTime<Utc>,
}

/// Ownership change after a paid resale.
#[derive(Debug, Clone)]
pub struct ResaleTransfer {
    /// Desired state of the source ticket; its `version` is the one the caller read.
    pub source: Ticket,
    /// New ticket for a partial-quantity sale.
    pub sibling: Option<Ticket>,
    /// Bid to mark paid; all other open or accepted bids are rejected.
    pub paid_bid_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// Repository for tickets and their resale bid ledger.
///
/// Every mutating method is conditional: it returns `false` (or zero) when the
/// row no longer matches the expected state, never overwriting a concurrent winner.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    /// Matches either the ticket code or the barcode value.
    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Ticket>>;

    async fn find_by_payment_reference(&self, reference: &str) -> StoreResult<Option<Ticket>>;

    /// Seat counts for the event, narrowed to one category when `scope` is set.
    async fn capacity_snapshot(
        &self,
        event_id: Uuid,
        scope: Option<&str>,
        capacity: Option<i64>,
        fresh_since: DateTime<Utc>,
    ) -> StoreResult<CapacitySnapshot>;

    /// Inserts `ticket` only if it fits every pool in `limits` given sold and fresh
    /// pending seats, atomically with respect to other capacity writes on the event.
    async fn insert_within_capacity(
        &self,
        ticket: &Ticket,
        limits: &CapacityLimits,
        fresh_since: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// `pending` only.
    async fn set_payment_reference(
        &self,
        ticket_id: Uuid,
        provider: &str,
        reference: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// `pending -> paid`. A reservation created before `fresh_since` no longer holds
    /// its seats, so it is re-checked against `limits` under the same lock as inserts.
    async fn mark_paid_within_capacity(
        &self,
        ticket_id: Uuid,
        limits: &CapacityLimits,
        fresh_since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// `pending -> cancelled`.
    async fn cancel_pending(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// `pending -> expired` for reservations created before `created_before`.
    async fn expire_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        at: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>>;

    /// `paid -> used`, clearing resale state and closing outstanding bids.
    async fn mark_used(&self, ticket_id: Uuid, used_by: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn apply_resale_update(&self, update: &ResaleUpdate) -> StoreResult<bool>;

    async fn apply_resale_transfer(&self, transfer: &ResaleTransfer) -> StoreResult<bool>;

    /// Tickets holding an accepted offer whose window closed at or before `now`.
    async fn list_lapsed_offers(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Ticket>>;

    async fn get_bid(&self, id: Uuid) -> StoreResult<Option<ResaleBid>>;

    async fn list_bids(&self, ticket_id: Uuid) -> StoreResult<Vec<ResaleBid>>;

    /// Inserts the bidder's open bid or replaces the amount of the existing one.
    async fn upsert_open_bid(&self, bid: &ResaleBid) -> StoreResult<ResaleBid>;

    /// `from -> to` for a single bid.
    async fn transition_bid(
        &self,
        bid_id: Uuid,
        from: BidStatus,
        to: BidStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Ledger of checkout intents. Writes never touch an attempt whose fulfillment is done.
#[async_trait]
pub trait PaymentAttemptRepository: Send + Sync {
    async fn insert_attempt(&self, attempt: &PaymentAttempt) -> StoreResult<()>;

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<PaymentAttempt>>;

    async fn record_checkout(
        &self,
        reference: &str,
        checkout: &GatewayCheckout,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Stores the verify payload and the gateway-reported status.
    async fn record_verification(
        &self,
        reference: &str,
        status: AttemptStatus,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Marks the attempt (and its fulfillment) failed with a reason.
    async fn mark_failed(
        &self,
        reference: &str,
        status: AttemptStatus,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Marks only the fulfillment failed; the payment itself succeeded.
    async fn mark_fulfillment_failed(&self, reference: &str, reason: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// `fulfillment -> done`. Exactly one caller observes `true`.
    async fn mark_fulfilled(&self, reference: &str, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Initialized attempts for a ticket become `expired`.
    async fn expire_open_attempts(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait WebhookLogRepository: Send + Sync {
    async fn record_webhook(&self, entry: &WebhookLogEntry) -> StoreResult<()>;
}

/// Read access to the events collaborator.
#[async_trait]
pub trait EventCatalog: Send + Sync {
    async fn get_event(&self, id: Uuid) -> StoreResult<Option<EventListing>>;
}
