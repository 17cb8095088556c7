use admit_core::{PaymentAttempt, PaymentKind, ResaleBid, Ticket};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::checkout::CheckoutService;
use crate::context::TicketingContext;
use crate::error::{TicketError, TicketResult};
use crate::lifecycle::{CheckInResult, PriceView, ReserveRequest, TicketLifecycle};
use crate::reconciler::{PaymentReconciler, ReconcileOutcome};
use crate::resale::{ListingRequest, ResaleCheckoutOutcome, ResaleMarketplace};
use crate::sweeper::ResaleExpirySweeper;
use crate::webhook::{GatewayEventHandler, WebhookAck};

/// Entry point for the HTTP layer. Wall-clock time is taken here; the
/// components underneath take `now` explicitly.
#[derive(Clone)]
pub struct TicketingService {
    ctx: TicketingContext,
    lifecycle: Arc<TicketLifecycle>,
    checkout: Arc<CheckoutService>,
    marketplace: Arc<ResaleMarketplace>,
    reconciler: Arc<PaymentReconciler>,
    webhooks: Arc<GatewayEventHandler>,
    sweeper: Arc<ResaleExpirySweeper>,
}

impl TicketingService {
    pub fn new(ctx: TicketingContext) -> Self {
        let lifecycle = Arc::new(TicketLifecycle::new(ctx.clone()));
        let checkout = Arc::new(CheckoutService::new(ctx.clone()));
        let marketplace = Arc::new(ResaleMarketplace::new(ctx.clone(), checkout.clone()));
        let reconciler = Arc::new(PaymentReconciler::new(ctx.clone(), marketplace.clone()));
        let webhooks = Arc::new(GatewayEventHandler::new(ctx.clone(), reconciler.clone()));
        let sweeper = Arc::new(ResaleExpirySweeper::new(ctx.clone(), marketplace.clone()));
        Self {
            ctx,
            lifecycle,
            checkout,
            marketplace,
            reconciler,
            webhooks,
            sweeper,
        }
    }

    pub fn context(&self) -> &TicketingContext {
        &self.ctx
    }

    pub fn lifecycle(&self) -> &Arc<TicketLifecycle> {
        &self.lifecycle
    }

    pub fn marketplace(&self) -> &Arc<ResaleMarketplace> {
        &self.marketplace
    }

    pub fn reconciler(&self) -> &Arc<PaymentReconciler> {
        &self.reconciler
    }

    pub fn sweeper(&self) -> Arc<ResaleExpirySweeper> {
        self.sweeper.clone()
    }

    // ========================================================================
    // Primary sale
    // ========================================================================

    pub async fn reserve_ticket(&self, request: ReserveRequest) -> TicketResult<Ticket> {
        self.lifecycle.reserve(request, Utc::now()).await
    }

    pub async fn quote_price(&self, event_id: Uuid, category: Option<&str>) -> TicketResult<PriceView> {
        self.lifecycle.quote_price(event_id, category, Utc::now()).await
    }

    pub async fn get_ticket(&self, ticket_id: Uuid, actor: &str) -> TicketResult<Ticket> {
        self.lifecycle.get(ticket_id, actor).await
    }

    pub async fn begin_purchase_checkout(
        &self,
        ticket_id: Uuid,
        buyer: &str,
        email: &str,
        callback_url: Option<String>,
    ) -> TicketResult<PaymentAttempt> {
        self.checkout
            .begin_purchase_checkout(ticket_id, buyer, email, callback_url, Utc::now())
            .await
    }

    pub async fn verify_purchase(&self, reference: &str, actor: &str) -> TicketResult<ReconcileOutcome> {
        self.authorize_verify(reference, actor, false).await?;
        self.reconciler.reconcile(reference, None, Utc::now()).await
    }

    pub async fn check_in(&self, code: &str, event_id: Option<Uuid>, actor: &str) -> TicketResult<CheckInResult> {
        self.lifecycle.check_in(code, event_id, actor, Utc::now()).await
    }

    // ========================================================================
    // Resale
    // ========================================================================

    pub async fn list_resale(&self, ticket_id: Uuid, owner: &str, request: ListingRequest) -> TicketResult<Ticket> {
        self.marketplace.list(ticket_id, owner, request, Utc::now()).await
    }

    pub async fn cancel_resale_listing(&self, ticket_id: Uuid, owner: &str) -> TicketResult<Ticket> {
        self.marketplace.cancel_listing(ticket_id, owner, Utc::now()).await
    }

    pub async fn place_bid(&self, ticket_id: Uuid, bidder: &str, amount_naira: i64) -> TicketResult<ResaleBid> {
        self.marketplace.place_bid(ticket_id, bidder, amount_naira, Utc::now()).await
    }

    pub async fn accept_bid(&self, ticket_id: Uuid, owner: &str, bid_id: Uuid) -> TicketResult<(Ticket, ResaleBid)> {
        self.marketplace.accept_bid(ticket_id, owner, bid_id, Utc::now()).await
    }

    pub async fn reject_bid(&self, ticket_id: Uuid, owner: &str, bid_id: Uuid) -> TicketResult<ResaleBid> {
        self.marketplace.reject_bid(ticket_id, owner, bid_id, Utc::now()).await
    }

    pub async fn withdraw_bid(&self, ticket_id: Uuid, bidder: &str, bid_id: Uuid) -> TicketResult<ResaleBid> {
        self.marketplace.withdraw_bid(ticket_id, bidder, bid_id, Utc::now()).await
    }

    pub async fn list_bids(&self, ticket_id: Uuid, actor: &str) -> TicketResult<Vec<ResaleBid>> {
        self.marketplace.list_bids(ticket_id, actor, Utc::now()).await
    }

    pub async fn begin_resale_checkout(
        &self,
        ticket_id: Uuid,
        buyer: &str,
        email: &str,
        callback_url: Option<String>,
    ) -> TicketResult<ResaleCheckoutOutcome> {
        self.marketplace
            .begin_resale_checkout(ticket_id, buyer, email, callback_url, Utc::now())
            .await
    }

    pub async fn verify_resale_purchase(&self, reference: &str, actor: &str) -> TicketResult<ReconcileOutcome> {
        self.authorize_verify(reference, actor, true).await?;
        self.reconciler.reconcile(reference, None, Utc::now()).await
    }

    // ========================================================================
    // Gateway
    // ========================================================================

    pub async fn handle_gateway_event(&self, raw_body: &[u8], signature: Option<&str>) -> TicketResult<WebhookAck> {
        self.webhooks.handle(raw_body, signature, Utc::now()).await
    }

    /// Only the paying buyer may drive verification, and only through the matching route.
    async fn authorize_verify(&self, reference: &str, actor: &str, resale: bool) -> TicketResult<()> {
        let reference = reference.trim();
        let Some(attempt) = self.ctx.attempts.get_by_reference(reference).await? else {
            // Legacy references have no ledger row; the ticket's holder stands in for the buyer.
            return match self.ctx.tickets.find_by_payment_reference(reference).await? {
                Some(ticket) if ticket.buyer_user_id != actor => Err(TicketError::NotFound("Payment")),
                _ => Ok(()),
            };
        };
        if attempt.buyer_user_id != actor {
            return Err(TicketError::NotFound("Payment"));
        }
        let is_resale = matches!(attempt.kind, PaymentKind::TicketResalePurchase { .. });
        if is_resale != resale {
            return Err(TicketError::Validation(format!(
                "Reference belongs to a {} payment",
                attempt.kind.as_str()
            )));
        }
        Ok(())
    }
}
