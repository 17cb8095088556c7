use admit_catalog::inventory::{freshness_cutoff, remaining_across};
use admit_catalog::CapacityLimits;
use admit_core::notify::notify_best_effort;
use admit_core::{
    AttemptStatus, GatewayError, GatewayVerification, PaymentAttempt, PaymentKind, Ticket, TicketStatus,
};
use admit_shared::models::events::NotificationKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::TicketingContext;
use crate::error::{TicketError, TicketResult};
use crate::resale::{PurchaseSource, ResaleMarketplace};

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub reference: String,
    pub ticket: Ticket,
    pub status: AttemptStatus,
    /// The payment had already been fulfilled; nothing was written.
    pub already_verified: bool,
}

/// The single path that turns a confirmed payment into a paid ticket or a resale transfer.
///
/// Verify calls and webhooks for the same reference may race; conditional writes on
/// the ticket and the attempt make every repeat a no-op.
pub struct PaymentReconciler {
    ctx: TicketingContext,
    marketplace: Arc<ResaleMarketplace>,
}

impl PaymentReconciler {
    pub fn new(ctx: TicketingContext, marketplace: Arc<ResaleMarketplace>) -> Self {
        Self { ctx, marketplace }
    }

    pub async fn reconcile(
        &self,
        reference: &str,
        payload: Option<GatewayVerification>,
        now: DateTime<Utc>,
    ) -> TicketResult<ReconcileOutcome> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(TicketError::Validation("Payment reference is required".to_string()));
        }

        // 1. Resolve the attempt, or fall back to tickets created before the ledger existed
        let Some(attempt) = self.ctx.attempts.get_by_reference(reference).await? else {
            return self.reconcile_legacy(reference, payload, now).await;
        };

        // 2. Already fulfilled
        if attempt.is_fulfilled() {
            let ticket = self.fulfilled_ticket(&attempt).await?;
            return Ok(ReconcileOutcome {
                reference: attempt.reference,
                ticket,
                status: AttemptStatus::Success,
                already_verified: true,
            });
        }

        // 3. Authoritative payload and checks
        let verification = match payload {
            Some(v) => v,
            None => self.verify(reference).await?,
        };
        self.ctx
            .attempts
            .record_verification(reference, Self::reported_status(&verification), &verification.raw, now)
            .await?;
        if let Err(e) = Self::check_payment(&verification, attempt.amount_minor_units, &attempt.currency) {
            let status = if verification.is_abandoned() {
                AttemptStatus::Abandoned
            } else {
                AttemptStatus::Failed
            };
            warn!(reference = %reference, "Payment rejected: {}", e);
            self.ctx
                .attempts
                .mark_failed(reference, status, &e.to_string(), now)
                .await?;
            return Err(e);
        }

        // 4. Fulfil
        let fulfilled = match attempt.kind {
            PaymentKind::TicketPurchase { ticket_id } => self.fulfil_purchase(ticket_id, now).await,
            PaymentKind::TicketResalePurchase {
                source_ticket_id,
                accepted_bid_id,
            } => {
                let source = PurchaseSource {
                    reference: attempt.reference.clone(),
                    provider: attempt.provider.clone(),
                    buyer_user_id: attempt.buyer_user_id.clone(),
                    accepted_bid_id,
                    paid_minor_units: verification.amount_minor_units,
                };
                self.marketplace.purchase(source_ticket_id, &source, now).await
            }
        };
        let ticket = match fulfilled {
            Ok(ticket) => ticket,
            Err(e) => {
                error!(reference = %reference, kind = attempt.kind.as_str(), "Fulfillment failed: {}", e);
                if let Err(mark_err) = self
                    .ctx
                    .attempts
                    .mark_fulfillment_failed(reference, &e.to_string(), now)
                    .await
                {
                    error!(reference = %reference, "Could not record fulfillment failure: {}", mark_err);
                }
                return Err(e);
            }
        };

        // 5. Mark done only after the ticket write committed
        let won = self
            .ctx
            .attempts
            .mark_fulfilled(reference, ticket.id, now)
            .await?;
        if won {
            info!(
                reference = %reference,
                ticket_id = %ticket.id,
                kind = attempt.kind.as_str(),
                amount = verification.amount_minor_units,
                "Payment fulfilled"
            );
            if let PaymentKind::TicketPurchase { .. } = attempt.kind {
                notify_best_effort(
                    &self.ctx.notifier,
                    &ticket.buyer_user_id,
                    NotificationKind::TicketPaid,
                    "Payment confirmed",
                    "Your ticket is ready",
                    serde_json::json!({ "ticket_id": ticket.id, "reference": reference }),
                )
                .await;
            }
        } else {
            info!(reference = %reference, "Payment already fulfilled by a concurrent reconcile");
        }

        Ok(ReconcileOutcome {
            reference: attempt.reference,
            ticket,
            status: AttemptStatus::Success,
            already_verified: !won,
        })
    }

    async fn verify(&self, reference: &str) -> TicketResult<GatewayVerification> {
        let timeout = self.ctx.gateway_timeout();
        match tokio::time::timeout(timeout, self.ctx.gateway.verify_transaction(reference)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GatewayError::Timeout(timeout.as_millis() as u64).into()),
        }
    }

    fn reported_status(verification: &GatewayVerification) -> AttemptStatus {
        if verification.is_success() {
            AttemptStatus::Success
        } else if verification.is_abandoned() {
            AttemptStatus::Abandoned
        } else if verification.status.eq_ignore_ascii_case("failed") {
            AttemptStatus::Failed
        } else {
            AttemptStatus::Initialized
        }
    }

    fn check_payment(verification: &GatewayVerification, expected_minor: i64, currency: &str) -> TicketResult<()> {
        if !verification.is_success() {
            return Err(TicketError::PaymentNotCompleted(format!(
                "gateway reported {}",
                verification.status
            )));
        }
        if !verification.currency.eq_ignore_ascii_case(currency) {
            return Err(TicketError::CurrencyMismatch {
                expected: currency.to_string(),
                paid: verification.currency.clone(),
            });
        }
        if verification.amount_minor_units < expected_minor {
            return Err(TicketError::AmountMismatch {
                expected: expected_minor,
                paid: verification.amount_minor_units,
            });
        }
        Ok(())
    }

    /// `pending -> paid`. Losing to a concurrent reconcile is not an error.
    async fn fulfil_purchase(&self, ticket_id: Uuid, now: DateTime<Utc>) -> TicketResult<Ticket> {
        let ticket = self
            .ctx
            .tickets
            .get_ticket(ticket_id)
            .await?
            .ok_or(TicketError::NotFound("Ticket"))?;
        let (flipped, current) = self.mark_paid(&ticket, now).await?;
        if flipped || current.status.is_sold() {
            return Ok(current);
        }
        Err(TicketError::TicketNotEligible(format!(
            "ticket is {}",
            current.status.as_str()
        )))
    }

    /// Flips a pending ticket to paid and returns its latest state. A reservation older
    /// than the freshness window no longer holds seats, so it must fit again.
    async fn mark_paid(&self, ticket: &Ticket, now: DateTime<Utc>) -> TicketResult<(bool, Ticket)> {
        let fresh_since = freshness_cutoff(now, self.ctx.rules.pending_freshness_minutes);
        let limits = if ticket.created_at < fresh_since {
            self.limits_for(ticket).await?
        } else {
            CapacityLimits::default()
        };

        let flipped = self
            .ctx
            .tickets
            .mark_paid_within_capacity(ticket.id, &limits, fresh_since, now)
            .await?;
        let current = self
            .ctx
            .tickets
            .get_ticket(ticket.id)
            .await?
            .ok_or(TicketError::NotFound("Ticket"))?;
        if flipped || current.status != TicketStatus::Pending {
            return Ok((flipped, current));
        }

        // Still pending: the seats went to other buyers while this checkout sat open.
        let mut snapshots = Vec::with_capacity(2);
        for (scope, capacity) in limits.scopes() {
            snapshots.push(
                self.ctx
                    .tickets
                    .capacity_snapshot(current.event_id, scope, capacity, fresh_since)
                    .await?,
            );
        }
        warn!(ticket_id = %current.id, quantity = current.quantity, "Late payment no longer fits capacity");
        Err(TicketError::CapacityExceeded {
            requested: current.quantity as i64,
            remaining: remaining_across(&snapshots).unwrap_or(0),
        })
    }

    async fn limits_for(&self, ticket: &Ticket) -> TicketResult<CapacityLimits> {
        let event = self
            .ctx
            .events
            .get_event(ticket.event_id)
            .await?
            .ok_or(TicketError::NotFound("Event"))?;
        let category = ticket.category.as_deref().and_then(|name| event.category(name));
        Ok(event.capacity_limits(category))
    }

    async fn fulfilled_ticket(&self, attempt: &PaymentAttempt) -> TicketResult<Ticket> {
        let ticket_id = attempt.fulfillment_ticket_id.unwrap_or_else(|| attempt.kind.ticket_id());
        self.ctx
            .tickets
            .get_ticket(ticket_id)
            .await?
            .ok_or(TicketError::NotFound("Ticket"))
    }

    /// Tickets that carry a payment reference but have no ledger row.
    async fn reconcile_legacy(
        &self,
        reference: &str,
        payload: Option<GatewayVerification>,
        now: DateTime<Utc>,
    ) -> TicketResult<ReconcileOutcome> {
        let ticket = self
            .ctx
            .tickets
            .find_by_payment_reference(reference)
            .await?
            .ok_or(TicketError::NotFound("Payment"))?;

        if ticket.status.is_sold() {
            return Ok(ReconcileOutcome {
                reference: reference.to_string(),
                ticket,
                status: AttemptStatus::Success,
                already_verified: true,
            });
        }
        if ticket.status != TicketStatus::Pending {
            return Err(TicketError::TicketNotEligible(format!(
                "ticket is {}",
                ticket.status.as_str()
            )));
        }

        let verification = match payload {
            Some(v) => v,
            None => self.verify(reference).await?,
        };
        Self::check_payment(&verification, ticket.amount_minor_units(), &ticket.currency)?;

        let (flipped, current) = self.mark_paid(&ticket, now).await?;
        if !current.status.is_sold() {
            return Err(TicketError::TicketNotEligible(format!(
                "ticket is {}",
                current.status.as_str()
            )));
        }
        info!(reference = %reference, ticket_id = %current.id, "Legacy payment reconciled");

        Ok(ReconcileOutcome {
            reference: reference.to_string(),
            ticket: current,
            status: AttemptStatus::Success,
            already_verified: !flipped,
        })
    }
}
