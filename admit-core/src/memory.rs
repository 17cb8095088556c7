//! In-process store backing local runs and the test suites.
//!
//! A single mutex covers every collection, so each trait method is one critical
//! section and the conditional writes behave like their SQL counterparts.

use admit_catalog::inventory::check_across;
use admit_catalog::{CapacityLimits, CapacitySnapshot, EventListing};
use admit_shared::models::events::{NotificationEvent, NotificationKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{BidStatus, ResaleBid, ResaleStatus, Ticket, TicketStatus};
use crate::notify::NotificationSink;
use crate::payment::{AttemptStatus, FulfillmentStatus, GatewayCheckout, PaymentAttempt};
use crate::repository::*;
use crate::webhook::WebhookLogEntry;

#[derive(Default)]
struct MemoryState {
    events: HashMap<Uuid, EventListing>,
    tickets: HashMap<Uuid, Ticket>,
    bids: HashMap<Uuid, ResaleBid>,
    attempts: HashMap<String, PaymentAttempt>,
    webhooks: Vec<WebhookLogEntry>,
    faults: HashMap<&'static str, StoreError>,
    lost_writes: HashSet<&'static str>,
}

impl MemoryState {
    fn take_fault(&mut self, op: &'static str) -> StoreResult<()> {
        match self.faults.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Whether the next conditional write of `op` should report a lost race.
    fn take_lost_write(&mut self, op: &'static str) -> bool {
        self.lost_writes.remove(op)
    }

    fn code_taken(&self, ticket: &Ticket) -> bool {
        self.tickets.values().any(|t| {
            t.id != ticket.id && (t.ticket_code == ticket.ticket_code || t.barcode_value == ticket.barcode_value)
        })
    }

    fn reference_taken(&self, ticket_id: Uuid, reference: &str) -> bool {
        self.tickets
            .values()
            .any(|t| t.id != ticket_id && t.payment_reference.as_deref() == Some(reference))
    }

    fn snapshot(
        &self,
        event_id: Uuid,
        scope: Option<&str>,
        capacity: Option<i64>,
        fresh_since: DateTime<Utc>,
    ) -> CapacitySnapshot {
        let mut sold = 0;
        let mut pending_fresh = 0;
        for t in self.tickets.values() {
            if t.event_id != event_id {
                continue;
            }
            if let Some(scope) = scope {
                if t.category.as_deref() != Some(scope) {
                    continue;
                }
            }
            if t.status.is_sold() {
                sold += t.quantity as i64;
            } else if t.status == TicketStatus::Pending && t.created_at >= fresh_since {
                pending_fresh += t.quantity as i64;
            }
        }
        CapacitySnapshot {
            capacity,
            sold,
            pending_fresh,
        }
    }

    /// Whether `quantity` more seats fit every pool in `limits`.
    fn fits(&self, event_id: Uuid, limits: &CapacityLimits, fresh_since: DateTime<Utc>, quantity: i32) -> bool {
        let snapshots: Vec<CapacitySnapshot> = limits
            .scopes()
            .into_iter()
            .map(|(scope, capacity)| self.snapshot(event_id, scope, capacity, fresh_since))
            .collect();
        check_across(&snapshots, quantity as i64).is_ok()
    }

    /// Rejects the ticket's open bids (and the accepted one when `include_accepted`), except `keep`.
    fn close_bids(&mut self, ticket_id: Uuid, keep: Option<Uuid>, include_accepted: bool, at: DateTime<Utc>) {
        for bid in self.bids.values_mut() {
            if bid.ticket_id != ticket_id || Some(bid.id) == keep {
                continue;
            }
            let closable = bid.status == BidStatus::Open || (include_accepted && bid.status == BidStatus::Accepted);
            if closable {
                bid.status = BidStatus::Rejected;
                bid.responded_at = Some(at);
            }
        }
    }

    fn with_attempt<F>(&mut self, reference: &str, at: DateTime<Utc>, apply: F) -> bool
    where
        F: FnOnce(&mut PaymentAttempt),
    {
        match self.attempts.get_mut(reference) {
            Some(attempt) if attempt.fulfillment_status != FulfillmentStatus::Done => {
                apply(attempt);
                attempt.updated_at = at;
                true
            }
            _ => false,
        }
    }
}

fn bump(ticket: &mut Ticket, at: DateTime<Utc>) {
    ticket.version += 1;
    ticket.updated_at = at;
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }

    pub fn put_event(&self, event: EventListing) {
        if let Ok(mut state) = self.state() {
            state.events.insert(event.id, event);
        }
    }

    /// Makes the next call of `op` (a trait method name) fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: StoreError) {
        if let Ok(mut state) = self.state() {
            state.faults.insert(op, err);
        }
    }

    /// Makes the next call of `op` report that a concurrent writer got there first.
    pub fn lose_next_write(&self, op: &'static str) {
        if let Ok(mut state) = self.state() {
            state.lost_writes.insert(op);
        }
    }

    /// Inserts a ticket as-is, bypassing capacity checks.
    pub fn seed_ticket(&self, ticket: Ticket) {
        if let Ok(mut state) = self.state() {
            state.tickets.insert(ticket.id, ticket);
        }
    }

    /// Rewrites a ticket's creation time, e.g. to age a reservation.
    pub fn backdate_ticket(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Ok(mut state) = self.state() {
            if let Some(ticket) = state.tickets.get_mut(&id) {
                ticket.created_at = created_at;
            }
        }
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        self.state()
            .map(|s| s.tickets.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn attempts(&self) -> Vec<PaymentAttempt> {
        self.state()
            .map(|s| s.attempts.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn webhook_log(&self) -> Vec<WebhookLogEntry> {
        self.state().map(|s| s.webhooks.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventCatalog for InMemoryStore {
    async fn get_event(&self, id: Uuid) -> StoreResult<Option<EventListing>> {
        let mut state = self.state()?;
        state.take_fault("get_event")?;
        Ok(state.events.get(&id).cloned())
    }
}

#[async_trait]
impl TicketRepository for InMemoryStore {
    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let mut state = self.state()?;
        state.take_fault("get_ticket")?;
        Ok(state.tickets.get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Ticket>> {
        let mut state = self.state()?;
        state.take_fault("find_by_code")?;
        Ok(state
            .tickets
            .values()
            .find(|t| t.ticket_code == code || t.barcode_value == code)
            .cloned())
    }

    async fn find_by_payment_reference(&self, reference: &str) -> StoreResult<Option<Ticket>> {
        let mut state = self.state()?;
        state.take_fault("find_by_payment_reference")?;
        Ok(state
            .tickets
            .values()
            .find(|t| t.payment_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn capacity_snapshot(
        &self,
        event_id: Uuid,
        scope: Option<&str>,
        capacity: Option<i64>,
        fresh_since: DateTime<Utc>,
    ) -> StoreResult<CapacitySnapshot> {
        let mut state = self.state()?;
        state.take_fault("capacity_snapshot")?;
        Ok(state.snapshot(event_id, scope, capacity, fresh_since))
    }

    async fn insert_within_capacity(
        &self,
        ticket: &Ticket,
        limits: &CapacityLimits,
        fresh_since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("insert_within_capacity")?;

        if !state.fits(ticket.event_id, limits, fresh_since, ticket.quantity) {
            return Ok(false);
        }
        if state.code_taken(ticket) {
            return Err(StoreError::duplicate(TICKET_CODE_CONSTRAINT));
        }
        if let Some(reference) = ticket.payment_reference.as_deref() {
            if state.reference_taken(ticket.id, reference) {
                return Err(StoreError::duplicate(TICKET_PAYMENT_REFERENCE_CONSTRAINT));
            }
        }
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(true)
    }

    async fn set_payment_reference(
        &self,
        ticket_id: Uuid,
        provider: &str,
        reference: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("set_payment_reference")?;
        if state.reference_taken(ticket_id, reference) {
            return Err(StoreError::duplicate(TICKET_PAYMENT_REFERENCE_CONSTRAINT));
        }
        match state.tickets.get_mut(&ticket_id) {
            Some(t) if t.status == TicketStatus::Pending => {
                t.payment_provider = Some(provider.to_string());
                t.payment_reference = Some(reference.to_string());
                bump(t, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_paid_within_capacity(
        &self,
        ticket_id: Uuid,
        limits: &CapacityLimits,
        fresh_since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("mark_paid_within_capacity")?;
        let stale = match state.tickets.get(&ticket_id) {
            Some(t) if t.status == TicketStatus::Pending => t.created_at < fresh_since,
            _ => return Ok(false),
        };
        if stale {
            let (event_id, quantity) = match state.tickets.get(&ticket_id) {
                Some(t) => (t.event_id, t.quantity),
                None => return Ok(false),
            };
            if !state.fits(event_id, limits, fresh_since, quantity) {
                return Ok(false);
            }
        }
        match state.tickets.get_mut(&ticket_id) {
            Some(t) if t.status == TicketStatus::Pending => {
                t.status = TicketStatus::Paid;
                t.paid_at = Some(at);
                t.verified_at = Some(at);
                bump(t, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_pending(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("cancel_pending")?;
        match state.tickets.get_mut(&ticket_id) {
            Some(t) if t.status == TicketStatus::Pending => {
                t.status = TicketStatus::Cancelled;
                t.cancelled_at = Some(at);
                t.clear_resale();
                bump(t, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        at: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>> {
        let mut state = self.state()?;
        state.take_fault("expire_stale_pending")?;
        let mut expired = Vec::new();
        for t in state.tickets.values_mut() {
            if expired.len() as i64 >= limit {
                break;
            }
            if t.status == TicketStatus::Pending && t.created_at < created_before {
                t.status = TicketStatus::Expired;
                t.expired_at = Some(at);
                t.clear_resale();
                bump(t, at);
                expired.push(t.clone());
            }
        }
        Ok(expired)
    }

    async fn mark_used(&self, ticket_id: Uuid, used_by: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("mark_used")?;
        match state.tickets.get_mut(&ticket_id) {
            Some(t) if t.status == TicketStatus::Paid => {
                t.status = TicketStatus::Used;
                t.used_at = Some(at);
                t.used_by_user_id = Some(used_by.to_string());
                t.clear_resale();
                bump(t, at);
            }
            _ => return Ok(false),
        }
        state.close_bids(ticket_id, None, true, at);
        Ok(true)
    }

    async fn apply_resale_update(&self, update: &ResaleUpdate) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("apply_resale_update")?;

        let ticket_id = update.ticket.id;
        match state.tickets.get(&ticket_id) {
            Some(current) if current.version == update.ticket.version => {}
            _ => return Ok(false),
        }
        if let BidEffect::Accept { bid } = &update.bids {
            if let Some(existing) = state.bids.get(&bid.id) {
                if existing.status != BidStatus::Open {
                    return Ok(false);
                }
            }
        }

        match &update.bids {
            BidEffect::None => {}
            BidEffect::RejectOpen => state.close_bids(ticket_id, None, false, update.at),
            BidEffect::Accept { bid } => {
                let mut accepted = bid.clone();
                accepted.status = BidStatus::Accepted;
                accepted.responded_at = Some(update.at);
                state.bids.insert(accepted.id, accepted);
                state.close_bids(ticket_id, Some(bid.id), false, update.at);
            }
            BidEffect::Release { bid_id, status } => {
                if let Some(bid) = state.bids.get_mut(bid_id) {
                    if bid.status == BidStatus::Accepted {
                        bid.status = *status;
                        bid.responded_at = Some(update.at);
                    }
                }
            }
        }

        let mut next = update.ticket.clone();
        bump(&mut next, update.at);
        state.tickets.insert(ticket_id, next);
        Ok(true)
    }

    async fn apply_resale_transfer(&self, transfer: &ResaleTransfer) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("apply_resale_transfer")?;
        if state.take_lost_write("apply_resale_transfer") {
            return Ok(false);
        }

        let source_id = transfer.source.id;
        match state.tickets.get(&source_id) {
            Some(current) if current.version == transfer.source.version => {}
            _ => return Ok(false),
        }
        if let Some(reference) = transfer.source.payment_reference.as_deref() {
            if state.reference_taken(source_id, reference) {
                return Err(StoreError::duplicate(TICKET_PAYMENT_REFERENCE_CONSTRAINT));
            }
        }
        if let Some(sibling) = &transfer.sibling {
            if state.code_taken(sibling) {
                return Err(StoreError::duplicate(TICKET_CODE_CONSTRAINT));
            }
            if let Some(reference) = sibling.payment_reference.as_deref() {
                if state.reference_taken(sibling.id, reference) {
                    return Err(StoreError::duplicate(TICKET_PAYMENT_REFERENCE_CONSTRAINT));
                }
            }
        }

        if let Some(bid_id) = transfer.paid_bid_id {
            if let Some(bid) = state.bids.get_mut(&bid_id) {
                if bid.status == BidStatus::Accepted {
                    bid.status = BidStatus::Paid;
                    bid.paid_at = Some(transfer.at);
                    bid.responded_at = Some(transfer.at);
                }
            }
        }
        state.close_bids(source_id, transfer.paid_bid_id, true, transfer.at);

        let mut source = transfer.source.clone();
        bump(&mut source, transfer.at);
        state.tickets.insert(source_id, source);
        if let Some(sibling) = &transfer.sibling {
            state.tickets.insert(sibling.id, sibling.clone());
        }
        Ok(true)
    }

    async fn list_lapsed_offers(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Ticket>> {
        let mut state = self.state()?;
        state.take_fault("list_lapsed_offers")?;
        Ok(state
            .tickets
            .values()
            .filter(|t| t.resale.status == ResaleStatus::OfferAccepted && t.resale.offer_lapsed(now))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_bid(&self, id: Uuid) -> StoreResult<Option<ResaleBid>> {
        let mut state = self.state()?;
        state.take_fault("get_bid")?;
        Ok(state.bids.get(&id).cloned())
    }

    async fn list_bids(&self, ticket_id: Uuid) -> StoreResult<Vec<ResaleBid>> {
        let mut state = self.state()?;
        state.take_fault("list_bids")?;
        let mut bids: Vec<ResaleBid> = state
            .bids
            .values()
            .filter(|b| b.ticket_id == ticket_id)
            .cloned()
            .collect();
        bids.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bids)
    }

    async fn upsert_open_bid(&self, bid: &ResaleBid) -> StoreResult<ResaleBid> {
        let mut state = self.state()?;
        state.take_fault("upsert_open_bid")?;
        let existing = state.bids.values_mut().find(|b| {
            b.ticket_id == bid.ticket_id && b.bidder_user_id == bid.bidder_user_id && b.status == BidStatus::Open
        });
        if let Some(existing) = existing {
            existing.amount_naira = bid.amount_naira;
            existing.created_at = bid.created_at;
            return Ok(existing.clone());
        }
        state.bids.insert(bid.id, bid.clone());
        Ok(bid.clone())
    }

    async fn transition_bid(
        &self,
        bid_id: Uuid,
        from: BidStatus,
        to: BidStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("transition_bid")?;
        match state.bids.get_mut(&bid_id) {
            Some(bid) if bid.status == from => {
                bid.status = to;
                bid.responded_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl PaymentAttemptRepository for InMemoryStore {
    async fn insert_attempt(&self, attempt: &PaymentAttempt) -> StoreResult<()> {
        let mut state = self.state()?;
        state.take_fault("insert_attempt")?;
        if state.attempts.contains_key(&attempt.reference) {
            return Err(StoreError::duplicate(ATTEMPT_REFERENCE_CONSTRAINT));
        }
        state.attempts.insert(attempt.reference.clone(), attempt.clone());
        Ok(())
    }

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<PaymentAttempt>> {
        let mut state = self.state()?;
        state.take_fault("get_by_reference")?;
        Ok(state.attempts.get(reference).cloned())
    }

    async fn record_checkout(
        &self,
        reference: &str,
        checkout: &GatewayCheckout,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("record_checkout")?;
        Ok(state.with_attempt(reference, at, |a| {
            a.authorization_url = Some(checkout.authorization_url.clone());
            a.access_code = Some(checkout.access_code.clone());
            a.initialize_payload = Some(checkout.raw.clone());
        }))
    }

    async fn record_verification(
        &self,
        reference: &str,
        status: AttemptStatus,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("record_verification")?;
        Ok(state.with_attempt(reference, at, |a| {
            a.status = status;
            a.verify_payload = Some(payload.clone());
        }))
    }

    async fn mark_failed(
        &self,
        reference: &str,
        status: AttemptStatus,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("mark_failed")?;
        Ok(state.with_attempt(reference, at, |a| {
            a.status = status;
            a.fulfillment_status = FulfillmentStatus::Failed;
            a.failure_reason = Some(reason.to_string());
        }))
    }

    async fn mark_fulfillment_failed(&self, reference: &str, reason: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("mark_fulfillment_failed")?;
        Ok(state.with_attempt(reference, at, |a| {
            a.fulfillment_status = FulfillmentStatus::Failed;
            a.failure_reason = Some(reason.to_string());
        }))
    }

    async fn mark_fulfilled(&self, reference: &str, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.take_fault("mark_fulfilled")?;
        Ok(state.with_attempt(reference, at, |a| {
            a.status = AttemptStatus::Success;
            a.fulfillment_status = FulfillmentStatus::Done;
            a.fulfillment_ticket_id = Some(ticket_id);
            a.failure_reason = None;
            a.fulfilled_at = Some(at);
        }))
    }

    async fn expire_open_attempts(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state()?;
        state.take_fault("expire_open_attempts")?;
        let mut count = 0;
        for a in state.attempts.values_mut() {
            if a.kind.ticket_id() == ticket_id
                && a.status == AttemptStatus::Initialized
                && a.fulfillment_status != FulfillmentStatus::Done
            {
                a.status = AttemptStatus::Expired;
                a.fulfillment_status = FulfillmentStatus::Failed;
                a.failure_reason = Some("reservation expired".to_string());
                a.updated_at = at;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl WebhookLogRepository for InMemoryStore {
    async fn record_webhook(&self, entry: &WebhookLogEntry) -> StoreResult<()> {
        let mut state = self.state()?;
        state.take_fault("record_webhook")?;
        state.webhooks.push(entry.clone());
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotificationSink {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds_for(&self, user_id: &str) -> Vec<NotificationKind> {
        self.events()
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.kind)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events
            .lock()
            .map_err(|_| "notification recorder poisoned")?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResaleListing;
    use chrono::Duration;

    fn ticket(event_id: Uuid, quantity: i32, status: TicketStatus, created_at: DateTime<Utc>) -> Ticket {
        let id = Uuid::new_v4();
        Ticket {
            id,
            event_id,
            category: None,
            buyer_user_id: "buyer".to_string(),
            organizer_user_id: "org".to_string(),
            quantity,
            unit_price_naira: 1000,
            total_price_naira: 1000 * quantity as i64,
            currency: "NGN".to_string(),
            status,
            payment_provider: None,
            payment_reference: None,
            ticket_code: format!("ADM-{}", id.simple()),
            barcode_value: format!("BC{}", id.simple()),
            occurrence_starts_at: None,
            occurrence_ends_at: None,
            paid_at: None,
            verified_at: None,
            cancelled_at: None,
            used_at: None,
            expired_at: None,
            used_by_user_id: None,
            resold_from_ticket_id: None,
            resale: ResaleListing::default(),
            version: 0,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_capacity_counts_fresh_pending_only() {
        let store = InMemoryStore::new();
        let event_id = Uuid::new_v4();
        let now = Utc::now();
        store.seed_ticket(ticket(event_id, 2, TicketStatus::Paid, now));
        store.seed_ticket(ticket(event_id, 1, TicketStatus::Pending, now));
        store.seed_ticket(ticket(event_id, 5, TicketStatus::Pending, now - Duration::hours(2)));
        store.seed_ticket(ticket(event_id, 3, TicketStatus::Cancelled, now));

        let snapshot = store
            .capacity_snapshot(event_id, None, Some(10), now - Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(snapshot.sold, 2);
        assert_eq!(snapshot.pending_fresh, 1);

        let limits = CapacityLimits {
            event_capacity: Some(10),
            ..CapacityLimits::default()
        };
        let next = ticket(event_id, 8, TicketStatus::Pending, now);
        assert!(!store
            .insert_within_capacity(&next, &limits, now - Duration::minutes(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stale_reservation_is_rechecked_before_payment() {
        let store = InMemoryStore::new();
        let event_id = Uuid::new_v4();
        let now = Utc::now();
        let fresh_since = now - Duration::minutes(30);
        let limits = CapacityLimits {
            event_capacity: Some(2),
            ..CapacityLimits::default()
        };
        let stale = ticket(event_id, 2, TicketStatus::Pending, now - Duration::minutes(45));
        store.seed_ticket(stale.clone());
        store.seed_ticket(ticket(event_id, 1, TicketStatus::Paid, now));

        assert!(!store
            .mark_paid_within_capacity(stale.id, &limits, fresh_since, now)
            .await
            .unwrap());
        let stored = store.get_ticket(stale.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Pending);

        let roomy = CapacityLimits {
            event_capacity: Some(3),
            ..CapacityLimits::default()
        };
        assert!(store
            .mark_paid_within_capacity(stale.id, &roomy, fresh_since, now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_category_pool_also_counts_against_event_total() {
        let store = InMemoryStore::new();
        let event_id = Uuid::new_v4();
        let now = Utc::now();
        let mut regular = ticket(event_id, 2, TicketStatus::Paid, now);
        regular.category = Some("Regular".to_string());
        store.seed_ticket(regular);

        let vip_limits = CapacityLimits {
            category: Some("VIP".to_string()),
            category_capacity: Some(2),
            event_capacity: Some(3),
        };
        let mut vip = ticket(event_id, 2, TicketStatus::Pending, now);
        vip.category = Some("VIP".to_string());
        assert!(!store.insert_within_capacity(&vip, &vip_limits, now).await.unwrap());
        vip.quantity = 1;
        assert!(store.insert_within_capacity(&vip, &vip_limits, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_code_is_reported_by_constraint() {
        let store = InMemoryStore::new();
        let event_id = Uuid::new_v4();
        let now = Utc::now();
        let first = ticket(event_id, 1, TicketStatus::Pending, now);
        let mut second = ticket(event_id, 1, TicketStatus::Pending, now);
        second.ticket_code = first.ticket_code.clone();

        let open = CapacityLimits::default();
        assert!(store.insert_within_capacity(&first, &open, now).await.unwrap());
        let err = store
            .insert_within_capacity(&second, &open, now)
            .await
            .unwrap_err();
        assert!(err.is_duplicate_of(TICKET_CODE_CONSTRAINT));
    }

    #[tokio::test]
    async fn test_status_guarded_transitions() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let t = ticket(Uuid::new_v4(), 1, TicketStatus::Pending, now);
        store.seed_ticket(t.clone());

        let open = CapacityLimits::default();
        assert!(store.mark_paid_within_capacity(t.id, &open, now, now).await.unwrap());
        assert!(!store.mark_paid_within_capacity(t.id, &open, now, now).await.unwrap());
        assert!(!store.cancel_pending(t.id, now).await.unwrap());
        assert!(store.mark_used(t.id, "staff", now).await.unwrap());
        assert!(!store.mark_used(t.id, "staff", now).await.unwrap());

        let stored = store.get_ticket(t.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Used);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_resale_update_rejects_stale_version() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let t = ticket(Uuid::new_v4(), 1, TicketStatus::Paid, now);
        store.seed_ticket(t.clone());

        let mut listed = t.clone();
        listed.resale = ResaleListing::listed(1200, 1, true, now);
        let update = ResaleUpdate {
            ticket: listed,
            bids: BidEffect::RejectOpen,
            at: now,
        };
        assert!(store.apply_resale_update(&update).await.unwrap());
        assert!(!store.apply_resale_update(&update).await.unwrap());
    }

    #[tokio::test]
    async fn test_fault_injection_is_one_shot() {
        let store = InMemoryStore::new();
        store.fail_next("get_ticket", StoreError::Unavailable("down".into()));
        assert!(store.get_ticket(Uuid::new_v4()).await.is_err());
        assert!(store.get_ticket(Uuid::new_v4()).await.unwrap().is_none());
    }
}
