use admit_catalog::inventory::freshness_cutoff;
use admit_core::gateway::InitializeTransaction;
use admit_core::{AttemptStatus, FulfillmentStatus, GatewayError, PaymentAttempt, PaymentKind, TicketStatus};
use admit_shared::Masked;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::TicketingContext;
use crate::error::{TicketError, TicketResult};

/// Everything needed to open one checkout with the gateway.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub kind: PaymentKind,
    pub buyer_user_id: String,
    pub buyer_email: String,
    pub event_id: Uuid,
    pub amount_naira: i64,
    pub currency: String,
    pub callback_url: Option<String>,
}

/// Opens payment attempts and hands out gateway checkout handles.
pub struct CheckoutService {
    ctx: TicketingContext,
}

impl CheckoutService {
    pub fn new(ctx: TicketingContext) -> Self {
        Self { ctx }
    }

    pub fn new_reference(kind: &PaymentKind) -> String {
        format!("adm_{}_{}", kind.reference_tag(), Uuid::new_v4().simple())
    }

    /// Persists an attempt, initializes it with the gateway and records the handle.
    /// On gateway failure the attempt is failed and a pending purchase ticket cancelled.
    pub async fn begin_checkout(&self, request: CheckoutRequest, now: DateTime<Utc>) -> TicketResult<PaymentAttempt> {
        let email = request.buyer_email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(TicketError::Validation("A valid buyer email is required".to_string()));
        }
        if request.amount_naira <= 0 {
            return Err(TicketError::Validation("Checkout amount must be positive".to_string()));
        }

        let provider = self.ctx.gateway.provider().to_string();
        let reference = Self::new_reference(&request.kind);
        let mut attempt = PaymentAttempt {
            id: Uuid::new_v4(),
            reference: reference.clone(),
            provider: provider.clone(),
            kind: request.kind,
            status: AttemptStatus::Initialized,
            buyer_user_id: request.buyer_user_id.clone(),
            buyer_email: Some(Masked::new(email.clone())),
            event_id: request.event_id,
            amount_minor_units: request.amount_naira.saturating_mul(100),
            currency: request.currency.clone(),
            authorization_url: None,
            access_code: None,
            initialize_payload: None,
            verify_payload: None,
            fulfillment_status: FulfillmentStatus::Pending,
            fulfillment_ticket_id: None,
            failure_reason: None,
            fulfilled_at: None,
            created_at: now,
            updated_at: now,
        };

        // 1. Ledger row first, so every gateway reference is known locally
        self.ctx.attempts.insert_attempt(&attempt).await?;

        // 2. Pin the reference on the pending ticket
        if let PaymentKind::TicketPurchase { ticket_id } = request.kind {
            let pinned = self
                .ctx
                .tickets
                .set_payment_reference(ticket_id, &provider, &reference, now)
                .await?;
            if !pinned {
                self.ctx
                    .attempts
                    .mark_failed(&reference, AttemptStatus::Failed, "ticket no longer pending", now)
                    .await?;
                return Err(TicketError::TicketNotEligible("reservation is no longer pending".to_string()));
            }
        }

        // 3. Gateway initialize, bounded
        let init = InitializeTransaction {
            email,
            amount_minor_units: attempt.amount_minor_units,
            currency: attempt.currency.clone(),
            reference: reference.clone(),
            callback_url: request
                .callback_url
                .clone()
                .or_else(|| self.ctx.rules.default_callback_url.clone()),
            metadata: serde_json::json!({
                "kind": request.kind.as_str(),
                "ticket_id": request.kind.ticket_id(),
                "event_id": request.event_id,
                "buyer_user_id": request.buyer_user_id,
            }),
        };
        let timeout = self.ctx.gateway_timeout();
        let checkout = match tokio::time::timeout(timeout, self.ctx.gateway.initialize_transaction(&init)).await {
            Ok(Ok(checkout)) => checkout,
            Ok(Err(e)) => return Err(self.abort(&attempt, e, now).await),
            Err(_) => {
                let e = GatewayError::Timeout(timeout.as_millis() as u64);
                return Err(self.abort(&attempt, e, now).await);
            }
        };

        // 4. Store the handle
        self.ctx.attempts.record_checkout(&reference, &checkout, now).await?;
        attempt.authorization_url = Some(checkout.authorization_url.clone());
        attempt.access_code = Some(checkout.access_code.clone());
        attempt.initialize_payload = Some(checkout.raw);

        info!(
            reference = %reference,
            kind = attempt.kind.as_str(),
            amount = attempt.amount_minor_units,
            "Checkout initialized"
        );
        Ok(attempt)
    }

    /// Rolls local state forward after a failed initialize and returns the error to surface.
    async fn abort(&self, attempt: &PaymentAttempt, cause: GatewayError, now: DateTime<Utc>) -> TicketError {
        let reason = cause.to_string();
        warn!(reference = %attempt.reference, "Gateway initialize failed: {}", reason);

        if let Err(e) = self
            .ctx
            .attempts
            .mark_failed(&attempt.reference, AttemptStatus::Failed, &reason, now)
            .await
        {
            error!(reference = %attempt.reference, "Failed to record checkout failure: {}", e);
        }
        if let PaymentKind::TicketPurchase { ticket_id } = attempt.kind {
            match self.ctx.tickets.cancel_pending(ticket_id, now).await {
                Ok(true) => info!(ticket_id = %ticket_id, "Pending ticket cancelled after checkout failure"),
                Ok(false) => {}
                Err(e) => error!(ticket_id = %ticket_id, "Failed to cancel pending ticket: {}", e),
            }
        }
        TicketError::Gateway(cause)
    }

    /// Checkout for the buyer's own pending reservation.
    pub async fn begin_purchase_checkout(
        &self,
        ticket_id: Uuid,
        buyer_user_id: &str,
        buyer_email: &str,
        callback_url: Option<String>,
        now: DateTime<Utc>,
    ) -> TicketResult<PaymentAttempt> {
        let ticket = self
            .ctx
            .tickets
            .get_ticket(ticket_id)
            .await?
            .ok_or(TicketError::NotFound("Ticket"))?;
        if !ticket.is_owned_by(buyer_user_id) {
            return Err(TicketError::NotOwner);
        }
        if ticket.status != TicketStatus::Pending {
            return Err(TicketError::TicketNotEligible(format!(
                "ticket is {}",
                ticket.status.as_str()
            )));
        }
        if ticket.created_at < freshness_cutoff(now, self.ctx.rules.pending_freshness_minutes) {
            return Err(TicketError::TicketNotEligible("reservation has expired".to_string()));
        }

        self.begin_checkout(
            CheckoutRequest {
                kind: PaymentKind::TicketPurchase { ticket_id },
                buyer_user_id: buyer_user_id.to_string(),
                buyer_email: buyer_email.to_string(),
                event_id: ticket.event_id,
                amount_naira: ticket.total_price_naira,
                currency: ticket.currency.clone(),
                callback_url,
            },
            now,
        )
        .await
    }
}
