use admit_catalog::inventory::{check_across, freshness_cutoff, remaining_across};
use admit_catalog::{
    CapacityLimits, CapacitySnapshot, DemandSnapshot, DynamicPricingEngine, EventListing, Occurrence, PriceQuote,
    TicketCategory,
};
use admit_core::notify::notify_best_effort;
use admit_core::{ResaleListing, StoreError, Ticket, TicketStatus};
use admit_shared::models::events::NotificationKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::code::TicketCodeAllocator;
use crate::context::TicketingContext;
use crate::error::{TicketError, TicketResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ReserveRequest {
    pub event_id: Uuid,
    pub buyer_user_id: String,
    pub quantity: i32,
    pub category: Option<String>,
}

/// Price preview for a prospective buyer.
#[derive(Debug, Clone, Serialize)]
pub struct PriceView {
    pub event_id: Uuid,
    pub category: Option<String>,
    pub currency: String,
    pub remaining: Option<i64>,
    #[serde(flatten)]
    pub quote: PriceQuote,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckInResult {
    pub ticket: Ticket,
    pub already_used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

/// Reservation, price preview and admission of tickets.
pub struct TicketLifecycle {
    ctx: TicketingContext,
    pricing: DynamicPricingEngine,
    allocator: TicketCodeAllocator,
}

impl TicketLifecycle {
    pub fn new(ctx: TicketingContext) -> Self {
        let allocator = TicketCodeAllocator::new(ctx.rules.code_prefix.clone(), ctx.rules.code_max_attempts);
        Self {
            ctx,
            pricing: DynamicPricingEngine::new(),
            allocator,
        }
    }

    pub fn allocator(&self) -> &TicketCodeAllocator {
        &self.allocator
    }

    async fn load_event(&self, event_id: Uuid) -> TicketResult<EventListing> {
        self.ctx
            .events
            .get_event(event_id)
            .await?
            .ok_or(TicketError::NotFound("Event"))
    }

    fn resolve_category<'a>(
        event: &'a EventListing,
        name: Option<&str>,
    ) -> TicketResult<Option<&'a TicketCategory>> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => event
                .category(name)
                .map(Some)
                .ok_or_else(|| TicketError::Validation(format!("Unknown ticket category: {}", name))),
            None => Ok(None),
        }
    }

    /// One snapshot per pool in `limits`, narrowest first.
    async fn snapshots(
        &self,
        event_id: Uuid,
        limits: &CapacityLimits,
        fresh_since: DateTime<Utc>,
    ) -> TicketResult<Vec<CapacitySnapshot>> {
        let mut snapshots = Vec::with_capacity(2);
        for (scope, capacity) in limits.scopes() {
            snapshots.push(
                self.ctx
                    .tickets
                    .capacity_snapshot(event_id, scope, capacity, fresh_since)
                    .await?,
            );
        }
        Ok(snapshots)
    }

    /// Demand seen by the pricing engine: the narrowest pool's counts.
    fn demand(snapshots: &[CapacitySnapshot]) -> DemandSnapshot {
        snapshots
            .first()
            .map(|s| DemandSnapshot {
                sold: s.sold,
                pending: s.pending_fresh,
            })
            .unwrap_or(DemandSnapshot { sold: 0, pending: 0 })
    }

    pub async fn quote_price(
        &self,
        event_id: Uuid,
        category: Option<&str>,
        now: DateTime<Utc>,
    ) -> TicketResult<PriceView> {
        let event = self.load_event(event_id).await?;
        if !event.is_published() {
            return Err(TicketError::EventNotPublished);
        }
        let category = Self::resolve_category(&event, category)?;
        let occurrence = self.ctx.occurrences.resolve(&event, now);
        let limits = event.capacity_limits(category);
        let fresh_since = freshness_cutoff(now, self.ctx.rules.pending_freshness_minutes);

        let snapshots = self.snapshots(event.id, &limits, fresh_since).await?;
        let quote = self
            .pricing
            .price(&event, category, occurrence.as_ref(), Self::demand(&snapshots), now);

        Ok(PriceView {
            event_id: event.id,
            category: category.map(|c| c.name.clone()),
            currency: event.currency.clone(),
            remaining: remaining_across(&snapshots),
            quote,
        })
    }

    /// Creates a ticket for `request.quantity` seats at the current dynamic price.
    pub async fn reserve(&self, request: ReserveRequest, now: DateTime<Utc>) -> TicketResult<Ticket> {
        let max = self.ctx.rules.max_quantity_per_order;
        if request.quantity < 1 || request.quantity > max {
            return Err(TicketError::Validation(format!("Quantity must be between 1 and {}", max)));
        }
        if request.buyer_user_id.trim().is_empty() {
            return Err(TicketError::Validation("Buyer is required".to_string()));
        }

        // 1. Event must be on sale
        let event = self.load_event(request.event_id).await?;
        if !event.is_published() {
            return Err(TicketError::EventNotPublished);
        }
        let category = Self::resolve_category(&event, request.category.as_deref())?;
        let occurrence = self
            .ctx
            .occurrences
            .resolve(&event, now)
            .ok_or(TicketError::NoUpcomingOccurrence)?;

        // 2. Early capacity check (re-checked atomically at insert)
        let limits = event.capacity_limits(category);
        let fresh_since = freshness_cutoff(now, self.ctx.rules.pending_freshness_minutes);
        let snapshots = self.snapshots(event.id, &limits, fresh_since).await?;
        check_across(&snapshots, request.quantity as i64)?;

        // 3. Lock the price into the ticket
        let quote = self
            .pricing
            .price(&event, category, Some(&occurrence), Self::demand(&snapshots), now);
        let draft = self.draft_ticket(&event, category, &occurrence, &request, quote.unit_price_naira, now);

        // 4. Insert under the capacity guard, regenerating the code on collisions
        let repo = Arc::clone(&self.ctx.tickets);
        let inserted = self
            .allocator
            .allocate(now, |code| {
                let mut ticket = draft.clone();
                ticket.ticket_code = code;
                ticket.barcode_value = TicketCodeAllocator::barcode();
                let repo = Arc::clone(&repo);
                let limits = limits.clone();
                async move {
                    let fits = repo.insert_within_capacity(&ticket, &limits, fresh_since).await?;
                    Ok::<_, StoreError>(fits.then_some(ticket))
                }
            })
            .await?;

        let Some(ticket) = inserted else {
            let latest = self.snapshots(event.id, &limits, fresh_since).await?;
            warn!(event_id = %event.id, requested = request.quantity, "Reservation lost capacity race");
            return Err(TicketError::CapacityExceeded {
                requested: request.quantity as i64,
                remaining: remaining_across(&latest).unwrap_or(0),
            });
        };

        info!(
            ticket_id = %ticket.id,
            event_id = %event.id,
            status = ticket.status.as_str(),
            quantity = ticket.quantity,
            total = ticket.total_price_naira,
            "Ticket reserved"
        );

        let (kind, title) = match ticket.status {
            TicketStatus::Paid => (NotificationKind::TicketPaid, "Your ticket is confirmed"),
            _ => (NotificationKind::TicketReserved, "Ticket reserved"),
        };
        notify_best_effort(
            &self.ctx.notifier,
            &ticket.buyer_user_id,
            kind,
            title,
            &format!("{} x {}", ticket.quantity, event.title),
            serde_json::json!({ "ticket_id": ticket.id, "event_id": event.id }),
        )
        .await;

        Ok(ticket)
    }

    fn draft_ticket(
        &self,
        event: &EventListing,
        category: Option<&TicketCategory>,
        occurrence: &Occurrence,
        request: &ReserveRequest,
        unit_price_naira: i64,
        now: DateTime<Utc>,
    ) -> Ticket {
        let total = unit_price_naira.saturating_mul(request.quantity as i64);
        let settled = event.is_free || total == 0 || self.ctx.rules.payment_bypass;
        Ticket {
            id: Uuid::new_v4(),
            event_id: event.id,
            category: category.map(|c| c.name.clone()),
            buyer_user_id: request.buyer_user_id.clone(),
            organizer_user_id: event.organizer_user_id.clone(),
            quantity: request.quantity,
            unit_price_naira,
            total_price_naira: total,
            currency: event.currency.clone(),
            status: if settled { TicketStatus::Paid } else { TicketStatus::Pending },
            payment_provider: None,
            payment_reference: None,
            ticket_code: String::new(),
            barcode_value: TicketCodeAllocator::barcode(),
            occurrence_starts_at: Some(occurrence.starts_at),
            occurrence_ends_at: Some(occurrence.ends_at),
            paid_at: settled.then_some(now),
            verified_at: None,
            cancelled_at: None,
            used_at: None,
            expired_at: None,
            used_by_user_id: None,
            resold_from_ticket_id: None,
            resale: ResaleListing::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Visible to the holder and the event organizer.
    pub async fn get(&self, ticket_id: Uuid, actor: &str) -> TicketResult<Ticket> {
        let ticket = self
            .ctx
            .tickets
            .get_ticket(ticket_id)
            .await?
            .ok_or(TicketError::NotFound("Ticket"))?;
        if ticket.buyer_user_id != actor && ticket.organizer_user_id != actor {
            return Err(TicketError::NotFound("Ticket"));
        }
        Ok(ticket)
    }

    /// Admits a scanned ticket. Re-scanning a used ticket reports the original admission.
    pub async fn check_in(
        &self,
        code: &str,
        event_id: Option<Uuid>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> TicketResult<CheckInResult> {
        let code = code.trim();
        if code.is_empty() {
            return Err(TicketError::Validation("Ticket code is required".to_string()));
        }

        let ticket = self
            .ctx
            .tickets
            .find_by_code(code)
            .await?
            .ok_or(TicketError::NotFound("Ticket"))?;
        if event_id.is_some_and(|id| id != ticket.event_id) {
            return Err(TicketError::Validation("Ticket belongs to a different event".to_string()));
        }
        if ticket.organizer_user_id != actor {
            return Err(TicketError::NotOrganizer);
        }

        match ticket.status {
            TicketStatus::Used => {
                return Ok(CheckInResult {
                    used_at: ticket.used_at,
                    ticket,
                    already_used: true,
                })
            }
            TicketStatus::Paid => {}
            other => return Err(TicketError::TicketNotEligible(format!("ticket is {}", other.as_str()))),
        }

        let occurrence = self.admission_occurrence(&ticket, now).await?;
        let rules = &self.ctx.rules;
        let (opens_at, closes_at) = occurrence.admission_window(
            Duration::hours(rules.check_in_opens_hours_before),
            Duration::hours(rules.check_in_closes_hours_after),
        );
        if now < opens_at || now > closes_at {
            return Err(TicketError::CheckInWindowClosed { opens_at, closes_at });
        }

        let admitted = self.ctx.tickets.mark_used(ticket.id, actor, now).await?;
        let current = self
            .ctx
            .tickets
            .get_ticket(ticket.id)
            .await?
            .ok_or(TicketError::NotFound("Ticket"))?;
        if !admitted {
            // Lost to a concurrent scan or state change.
            return match current.status {
                TicketStatus::Used => Ok(CheckInResult {
                    used_at: current.used_at,
                    ticket: current,
                    already_used: true,
                }),
                other => Err(TicketError::TicketNotEligible(format!("ticket is {}", other.as_str()))),
            };
        }

        info!(ticket_id = %current.id, event_id = %current.event_id, "Ticket checked in");
        notify_best_effort(
            &self.ctx.notifier,
            &current.buyer_user_id,
            NotificationKind::TicketCheckedIn,
            "Checked in",
            "Enjoy the event",
            serde_json::json!({ "ticket_id": current.id }),
        )
        .await;

        Ok(CheckInResult {
            used_at: current.used_at,
            ticket: current,
            already_used: false,
        })
    }

    async fn admission_occurrence(&self, ticket: &Ticket, now: DateTime<Utc>) -> TicketResult<Occurrence> {
        if let (Some(starts_at), Some(ends_at)) = (ticket.occurrence_starts_at, ticket.occurrence_ends_at) {
            return Ok(Occurrence { starts_at, ends_at });
        }
        let event = self.load_event(ticket.event_id).await?;
        // Look back by the closing grace so a just-ended occurrence still resolves.
        let reference = now - Duration::hours(self.ctx.rules.check_in_closes_hours_after);
        self.ctx
            .occurrences
            .resolve(&event, reference)
            .ok_or(TicketError::NoUpcomingOccurrence)
    }
}
