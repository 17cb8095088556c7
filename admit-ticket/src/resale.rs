use admit_catalog::EventListing;
use admit_core::notify::notify_best_effort;
use admit_core::repository::TICKET_PAYMENT_REFERENCE_CONSTRAINT;
use admit_core::{
    BidEffect, BidStatus, PaymentAttempt, PaymentKind, ResaleBid, ResaleListing, ResaleStatus, ResaleTransfer,
    ResaleUpdate, StoreError, Ticket, TicketStatus,
};
use admit_shared::models::events::NotificationKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkout::{CheckoutRequest, CheckoutService};
use crate::code::TicketCodeAllocator;
use crate::context::TicketingContext;
use crate::error::{TicketError, TicketResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ListingRequest {
    pub price_naira: i64,
    pub quantity: Option<i32>,
    #[serde(default)]
    pub allow_bids: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResaleCheckoutOutcome {
    /// Buyer must complete payment with the gateway.
    Pending { attempt: PaymentAttempt },
    /// No payment was needed; the transfer already happened.
    Completed { ticket: Ticket },
}

/// Proof of payment for a resale purchase.
#[derive(Debug, Clone)]
pub struct PurchaseSource {
    pub reference: String,
    pub provider: String,
    pub buyer_user_id: String,
    pub accepted_bid_id: Option<Uuid>,
    pub paid_minor_units: i64,
}

/// Secondary market for paid tickets: listings, bids, exclusivity windows and transfers.
///
/// Every write is a compare-and-swap on the ticket version. Lapsed offers are
/// expired lazily before each operation and in bulk by the sweeper.
pub struct ResaleMarketplace {
    ctx: TicketingContext,
    checkout: Arc<CheckoutService>,
    allocator: TicketCodeAllocator,
}

impl ResaleMarketplace {
    pub fn new(ctx: TicketingContext, checkout: Arc<CheckoutService>) -> Self {
        let allocator = TicketCodeAllocator::new(ctx.rules.code_prefix.clone(), ctx.rules.code_max_attempts);
        Self {
            ctx,
            checkout,
            allocator,
        }
    }

    async fn fetch(&self, ticket_id: Uuid) -> TicketResult<Ticket> {
        self.ctx
            .tickets
            .get_ticket(ticket_id)
            .await?
            .ok_or(TicketError::NotFound("Ticket"))
    }

    async fn event(&self, event_id: Uuid) -> TicketResult<EventListing> {
        self.ctx
            .events
            .get_event(event_id)
            .await?
            .ok_or(TicketError::NotFound("Event"))
    }

    async fn bid_on(&self, ticket: &Ticket, bid_id: Uuid) -> TicketResult<ResaleBid> {
        match self.ctx.tickets.get_bid(bid_id).await? {
            Some(bid) if bid.ticket_id == ticket.id => Ok(bid),
            _ => Err(TicketError::NotFound("Bid")),
        }
    }

    async fn load(&self, ticket_id: Uuid, now: DateTime<Utc>) -> TicketResult<Ticket> {
        let ticket = self.fetch(ticket_id).await?;
        self.expire_offer(ticket, now).await
    }

    async fn commit(&self, next: Ticket, bids: BidEffect, now: DateTime<Utc>) -> TicketResult<Ticket> {
        let ticket_id = next.id;
        let update = ResaleUpdate {
            ticket: next,
            bids,
            at: now,
        };
        if !self.ctx.tickets.apply_resale_update(&update).await? {
            return Err(TicketError::ConcurrentUpdate);
        }
        self.fetch(ticket_id).await
    }

    fn require_resellable(ticket: &Ticket, owner: &str) -> TicketResult<()> {
        if !ticket.is_owned_by(owner) {
            return Err(TicketError::NotOwner);
        }
        if ticket.status != TicketStatus::Paid {
            return Err(TicketError::TicketNotEligible(format!(
                "ticket is {}",
                ticket.status.as_str()
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Exclusivity window
    // ========================================================================

    /// Returns an offer-accepted ticket to `listed` once its window has lapsed.
    /// Safe to call redundantly: losing the race just returns the current row.
    pub async fn expire_offer(&self, ticket: Ticket, now: DateTime<Utc>) -> TicketResult<Ticket> {
        if ticket.status != TicketStatus::Paid || !ticket.resale.offer_lapsed(now) {
            return Ok(ticket);
        }

        let bid_id = ticket.resale.accepted_bid_id;
        let reserved_buyer = ticket.resale.buyer_user_id.clone();
        let mut next = ticket.clone();
        next.resale.reopen();
        let effect = match bid_id {
            Some(bid_id) => BidEffect::Release {
                bid_id,
                status: BidStatus::Expired,
            },
            None => BidEffect::None,
        };

        let applied = self
            .ctx
            .tickets
            .apply_resale_update(&ResaleUpdate {
                ticket: next,
                bids: effect,
                at: now,
            })
            .await?;
        let current = self.fetch(ticket.id).await?;

        if applied {
            info!(ticket_id = %ticket.id, bid_id = ?bid_id, "Accepted resale offer expired");
            if let Some(buyer) = reserved_buyer {
                notify_best_effort(
                    &self.ctx.notifier,
                    &buyer,
                    NotificationKind::ResaleOfferExpired,
                    "Resale offer expired",
                    "Your payment window for this ticket has closed",
                    serde_json::json!({ "ticket_id": ticket.id, "bid_id": bid_id }),
                )
                .await;
            }
        }
        Ok(current)
    }

    // ========================================================================
    // Listings
    // ========================================================================

    pub async fn list(
        &self,
        ticket_id: Uuid,
        owner: &str,
        request: ListingRequest,
        now: DateTime<Utc>,
    ) -> TicketResult<Ticket> {
        let ticket = self.load(ticket_id, now).await?;
        Self::require_resellable(&ticket, owner)?;

        let event = self.event(ticket.event_id).await?;
        if !event.resale.enabled {
            return Err(TicketError::ResaleDisabled);
        }
        if ticket.resale.status == ResaleStatus::OfferAccepted {
            return Err(TicketError::TicketNotEligible(
                "an accepted offer is awaiting payment".to_string(),
            ));
        }

        let quantity = request.quantity.unwrap_or(ticket.quantity);
        if quantity < 1 || quantity > ticket.quantity {
            return Err(TicketError::Validation(format!(
                "Resale quantity must be between 1 and {}",
                ticket.quantity
            )));
        }
        if request.price_naira <= 0 {
            return Err(TicketError::Validation("Resale price must be positive".to_string()));
        }
        let cap = event.resale.price_cap(ticket.unit_price_naira, quantity as i64);
        if request.price_naira > cap {
            return Err(TicketError::PriceExceedsCap {
                price: request.price_naira,
                cap,
            });
        }

        let mut next = ticket.clone();
        next.resale = ResaleListing::listed(request.price_naira, quantity, request.allow_bids, now);
        let listed = self.commit(next, BidEffect::RejectOpen, now).await?;

        info!(
            ticket_id = %listed.id,
            price = request.price_naira,
            quantity,
            allow_bids = request.allow_bids,
            "Ticket listed for resale"
        );
        Ok(listed)
    }

    pub async fn cancel_listing(&self, ticket_id: Uuid, owner: &str, now: DateTime<Utc>) -> TicketResult<Ticket> {
        let ticket = self.load(ticket_id, now).await?;
        Self::require_resellable(&ticket, owner)?;
        if ticket.resale.status != ResaleStatus::Listed {
            return Err(TicketError::TicketNotEligible("ticket is not listed".to_string()));
        }

        let mut next = ticket.clone();
        next.clear_resale();
        let delisted = self.commit(next, BidEffect::RejectOpen, now).await?;
        info!(ticket_id = %delisted.id, "Resale listing cancelled");
        Ok(delisted)
    }

    // ========================================================================
    // Bids
    // ========================================================================

    pub async fn place_bid(
        &self,
        ticket_id: Uuid,
        bidder: &str,
        amount_naira: i64,
        now: DateTime<Utc>,
    ) -> TicketResult<ResaleBid> {
        let ticket = self.load(ticket_id, now).await?;
        if ticket.is_owned_by(bidder) {
            return Err(TicketError::AlreadyOwnThisTicket);
        }
        if ticket.status != TicketStatus::Paid || ticket.resale.status != ResaleStatus::Listed {
            return Err(TicketError::TicketNotEligible("ticket is not open for offers".to_string()));
        }
        if !ticket.resale.allow_bids {
            return Err(TicketError::TicketNotEligible("listing does not accept bids".to_string()));
        }
        let asking = ticket.resale.price_naira.unwrap_or(0);
        if amount_naira <= 0 || amount_naira > asking {
            return Err(TicketError::Validation(format!(
                "Bid must be between 1 and the asking price of {}",
                asking
            )));
        }

        let bid = self
            .ctx
            .tickets
            .upsert_open_bid(&ResaleBid::open(&ticket, bidder, amount_naira, now))
            .await?;
        info!(ticket_id = %ticket.id, bid_id = %bid.id, amount = amount_naira, "Resale bid placed");

        notify_best_effort(
            &self.ctx.notifier,
            &ticket.buyer_user_id,
            NotificationKind::ResaleBidPlaced,
            "New offer on your ticket",
            &format!("An offer of {} {} was placed", amount_naira, ticket.currency),
            serde_json::json!({ "ticket_id": ticket.id, "bid_id": bid.id }),
        )
        .await;
        Ok(bid)
    }

    /// Grants the bidder an exclusivity window to pay and rejects every other open bid.
    pub async fn accept_bid(
        &self,
        ticket_id: Uuid,
        owner: &str,
        bid_id: Uuid,
        now: DateTime<Utc>,
    ) -> TicketResult<(Ticket, ResaleBid)> {
        let ticket = self.load(ticket_id, now).await?;
        Self::require_resellable(&ticket, owner)?;
        match ticket.resale.status {
            ResaleStatus::Listed => {}
            ResaleStatus::OfferAccepted => {
                return Err(TicketError::TicketNotEligible("an offer is already accepted".to_string()))
            }
            ResaleStatus::None => return Err(TicketError::TicketNotEligible("ticket is not listed".to_string())),
        }

        let mut bid = self.bid_on(&ticket, bid_id).await?;
        if bid.status != BidStatus::Open {
            return Err(TicketError::TicketNotEligible(format!("bid is {}", bid.status.as_str())));
        }
        let event = self.event(ticket.event_id).await?;
        let expires_at = now + Duration::hours(event.resale.bid_window_hours.max(1));

        let losers: Vec<String> = self
            .ctx
            .tickets
            .list_bids(ticket.id)
            .await?
            .into_iter()
            .filter(|b| b.status == BidStatus::Open && b.id != bid.id)
            .map(|b| b.bidder_user_id)
            .collect();

        bid.expires_at = Some(expires_at);
        let mut next = ticket.clone();
        next.resale.status = ResaleStatus::OfferAccepted;
        next.resale.accepted_bid_id = Some(bid.id);
        next.resale.accepted_bid_expires_at = Some(expires_at);
        next.resale.buyer_user_id = Some(bid.bidder_user_id.clone());
        let accepted_ticket = self.commit(next, BidEffect::Accept { bid: bid.clone() }, now).await?;
        let accepted = self.bid_on(&accepted_ticket, bid.id).await?;

        info!(
            ticket_id = %accepted_ticket.id,
            bid_id = %accepted.id,
            expires_at = %expires_at,
            "Resale bid accepted"
        );

        notify_best_effort(
            &self.ctx.notifier,
            &accepted.bidder_user_id,
            NotificationKind::ResaleBidAccepted,
            "Your offer was accepted",
            &format!("Complete payment before {}", expires_at.to_rfc3339()),
            serde_json::json!({ "ticket_id": accepted_ticket.id, "bid_id": accepted.id }),
        )
        .await;
        for loser in losers {
            notify_best_effort(
                &self.ctx.notifier,
                &loser,
                NotificationKind::ResaleBidRejected,
                "Your offer was declined",
                "The seller accepted another offer",
                serde_json::json!({ "ticket_id": accepted_ticket.id }),
            )
            .await;
        }

        Ok((accepted_ticket, accepted))
    }

    pub async fn reject_bid(
        &self,
        ticket_id: Uuid,
        owner: &str,
        bid_id: Uuid,
        now: DateTime<Utc>,
    ) -> TicketResult<ResaleBid> {
        let ticket = self.load(ticket_id, now).await?;
        if !ticket.is_owned_by(owner) {
            return Err(TicketError::NotOwner);
        }
        let bid = self.bid_on(&ticket, bid_id).await?;
        if !self
            .ctx
            .tickets
            .transition_bid(bid.id, BidStatus::Open, BidStatus::Rejected, now)
            .await?
        {
            return Err(TicketError::TicketNotEligible("bid is no longer open".to_string()));
        }

        info!(ticket_id = %ticket.id, bid_id = %bid.id, "Resale bid rejected");
        notify_best_effort(
            &self.ctx.notifier,
            &bid.bidder_user_id,
            NotificationKind::ResaleBidRejected,
            "Your offer was declined",
            "The seller declined your offer",
            serde_json::json!({ "ticket_id": ticket.id, "bid_id": bid.id }),
        )
        .await;
        self.bid_on(&ticket, bid.id).await
    }

    /// Bidder retracts an open bid, or gives up an accepted one (reopening the listing).
    pub async fn withdraw_bid(
        &self,
        ticket_id: Uuid,
        bidder: &str,
        bid_id: Uuid,
        now: DateTime<Utc>,
    ) -> TicketResult<ResaleBid> {
        let ticket = self.load(ticket_id, now).await?;
        let bid = self.bid_on(&ticket, bid_id).await?;
        if bid.bidder_user_id != bidder {
            return Err(TicketError::NotFound("Bid"));
        }

        match bid.status {
            BidStatus::Open => {
                if !self
                    .ctx
                    .tickets
                    .transition_bid(bid.id, BidStatus::Open, BidStatus::Withdrawn, now)
                    .await?
                {
                    return Err(TicketError::TicketNotEligible("bid is no longer open".to_string()));
                }
            }
            BidStatus::Accepted if ticket.resale.accepted_bid_id == Some(bid.id) => {
                let mut next = ticket.clone();
                next.resale.reopen();
                self.commit(
                    next,
                    BidEffect::Release {
                        bid_id: bid.id,
                        status: BidStatus::Withdrawn,
                    },
                    now,
                )
                .await?;
            }
            other => return Err(TicketError::TicketNotEligible(format!("bid is {}", other.as_str()))),
        }

        info!(ticket_id = %ticket.id, bid_id = %bid.id, "Resale bid withdrawn");
        self.bid_on(&ticket, bid.id).await
    }

    /// The owner sees every bid; anyone else only their own.
    pub async fn list_bids(&self, ticket_id: Uuid, actor: &str, now: DateTime<Utc>) -> TicketResult<Vec<ResaleBid>> {
        let ticket = self.load(ticket_id, now).await?;
        let bids = self.ctx.tickets.list_bids(ticket.id).await?;
        if ticket.is_owned_by(actor) {
            return Ok(bids);
        }
        Ok(bids.into_iter().filter(|b| b.bidder_user_id == actor).collect())
    }

    // ========================================================================
    // Checkout and transfer
    // ========================================================================

    pub async fn begin_resale_checkout(
        &self,
        ticket_id: Uuid,
        buyer: &str,
        buyer_email: &str,
        callback_url: Option<String>,
        now: DateTime<Utc>,
    ) -> TicketResult<ResaleCheckoutOutcome> {
        let mut ticket = self.fetch(ticket_id).await?;
        if ticket.is_owned_by(buyer) {
            return Err(TicketError::AlreadyOwnThisTicket);
        }
        if ticket.status != TicketStatus::Paid {
            return Err(TicketError::TicketNotEligible(format!(
                "ticket is {}",
                ticket.status.as_str()
            )));
        }
        if ticket.resale.offer_lapsed(now) {
            let was_reserved_for_buyer = ticket.resale.buyer_user_id.as_deref() == Some(buyer);
            ticket = self.expire_offer(ticket, now).await?;
            if was_reserved_for_buyer {
                return Err(TicketError::OfferWindowExpired);
            }
        }

        let event = self.event(ticket.event_id).await?;
        if !event.resale.enabled {
            return Err(TicketError::ResaleDisabled);
        }

        let (bid_id, amount_naira, implicit) = match ticket.resale.status {
            ResaleStatus::None => {
                return Err(TicketError::TicketNotEligible("ticket is not listed for resale".to_string()))
            }
            ResaleStatus::OfferAccepted => {
                if ticket.resale.buyer_user_id.as_deref() != Some(buyer) {
                    return Err(TicketError::TicketNotEligible(
                        "ticket is reserved for another buyer".to_string(),
                    ));
                }
                let bid_id = ticket
                    .resale
                    .accepted_bid_id
                    .ok_or_else(|| TicketError::TicketNotEligible("accepted offer has no bid".to_string()))?;
                let bid = self.bid_on(&ticket, bid_id).await?;
                (bid_id, bid.amount_naira, false)
            }
            ResaleStatus::Listed => {
                if ticket.resale.allow_bids {
                    return Err(TicketError::BiddingRequired);
                }
                let price = ticket
                    .resale
                    .price_naira
                    .ok_or_else(|| TicketError::TicketNotEligible("listing has no price".to_string()))?;

                // Direct purchase reserves the ticket exactly like an accepted bid.
                let expires_at = now + Duration::hours(event.resale.bid_window_hours.max(1));
                let mut bid = ResaleBid::open(&ticket, buyer, price, now);
                bid.expires_at = Some(expires_at);
                let mut next = ticket.clone();
                next.resale.status = ResaleStatus::OfferAccepted;
                next.resale.accepted_bid_id = Some(bid.id);
                next.resale.accepted_bid_expires_at = Some(expires_at);
                next.resale.buyer_user_id = Some(buyer.to_string());
                let bid_id = bid.id;
                ticket = self.commit(next, BidEffect::Accept { bid }, now).await?;
                (bid_id, price, true)
            }
        };

        let kind = PaymentKind::TicketResalePurchase {
            source_ticket_id: ticket.id,
            accepted_bid_id: Some(bid_id),
        };

        if amount_naira == 0 || self.ctx.rules.payment_bypass {
            let source = PurchaseSource {
                reference: CheckoutService::new_reference(&kind),
                provider: "bypass".to_string(),
                buyer_user_id: buyer.to_string(),
                accepted_bid_id: Some(bid_id),
                paid_minor_units: amount_naira.saturating_mul(100),
            };
            let transferred = self.purchase(ticket.id, &source, now).await?;
            return Ok(ResaleCheckoutOutcome::Completed { ticket: transferred });
        }

        let request = CheckoutRequest {
            kind,
            buyer_user_id: buyer.to_string(),
            buyer_email: buyer_email.to_string(),
            event_id: ticket.event_id,
            amount_naira,
            currency: ticket.currency.clone(),
            callback_url,
        };
        match self.checkout.begin_checkout(request, now).await {
            Ok(attempt) => Ok(ResaleCheckoutOutcome::Pending { attempt }),
            Err(e) => {
                if implicit {
                    self.release_reservation(ticket.id, bid_id, now).await;
                }
                Err(e)
            }
        }
    }

    /// Undo a direct-purchase reservation after checkout could not start.
    async fn release_reservation(&self, ticket_id: Uuid, bid_id: Uuid, now: DateTime<Utc>) {
        let ticket = match self.fetch(ticket_id).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(ticket_id = %ticket_id, "Could not reload ticket to release reservation: {}", e);
                return;
            }
        };
        if ticket.resale.accepted_bid_id != Some(bid_id) {
            return;
        }
        let mut next = ticket;
        next.resale.reopen();
        let update = ResaleUpdate {
            ticket: next,
            bids: BidEffect::Release {
                bid_id,
                status: BidStatus::Withdrawn,
            },
            at: now,
        };
        match self.ctx.tickets.apply_resale_update(&update).await {
            Ok(true) => info!(ticket_id = %ticket_id, "Direct-purchase reservation released"),
            Ok(false) => {}
            Err(e) => warn!(ticket_id = %ticket_id, "Failed to release reservation: {}", e),
        }
    }

    /// Transfers the listed seats to the paying buyer. Idempotent per payment reference.
    pub async fn purchase(
        &self,
        source_ticket_id: Uuid,
        source: &PurchaseSource,
        now: DateTime<Utc>,
    ) -> TicketResult<Ticket> {
        // 1. Already transferred under this reference
        if let Some(done) = self.ctx.tickets.find_by_payment_reference(&source.reference).await? {
            return Ok(done);
        }

        // 2. Who may buy, and at what price
        let ticket = self.fetch(source_ticket_id).await?;
        let (price_naira, paid_bid_id) = match self.purchase_terms(&ticket, source, now).await {
            Ok(terms) => terms,
            Err(e) => {
                // A concurrent reconcile may have finished this purchase after step 1.
                return match self.ctx.tickets.find_by_payment_reference(&source.reference).await? {
                    Some(done) => Ok(done),
                    None => Err(e),
                };
            }
        };

        // 3. Transfer
        let seller = ticket.buyer_user_id.clone();
        let quantity = ticket.resale.quantity.unwrap_or(ticket.quantity).clamp(1, ticket.quantity);
        let transferred = if quantity < ticket.quantity {
            self.transfer_partial(&ticket, quantity, source, paid_bid_id, now).await?
        } else {
            self.transfer_full(&ticket, source, paid_bid_id, now).await?
        };

        let Some(transferred) = transferred else {
            // Lost the compare-and-swap: a concurrent reconcile may have finished this same purchase.
            return match self.ctx.tickets.find_by_payment_reference(&source.reference).await? {
                Some(done) => Ok(done),
                None => Err(TicketError::TransferContended),
            };
        };

        info!(
            source_ticket_id = %ticket.id,
            ticket_id = %transferred.id,
            quantity,
            price = price_naira,
            reference = %source.reference,
            "Resale transfer completed"
        );

        notify_best_effort(
            &self.ctx.notifier,
            &seller,
            NotificationKind::ResaleSold,
            "Your ticket was sold",
            &format!("{} seat(s) sold for {} {}", quantity, price_naira, ticket.currency),
            serde_json::json!({ "ticket_id": ticket.id, "reference": source.reference }),
        )
        .await;
        notify_best_effort(
            &self.ctx.notifier,
            &source.buyer_user_id,
            NotificationKind::ResalePurchased,
            "Ticket purchased",
            &format!("{} seat(s) are now yours", quantity),
            serde_json::json!({ "ticket_id": transferred.id, "reference": source.reference }),
        )
        .await;

        Ok(transferred)
    }

    /// Eligibility of `source` to buy `ticket`: the price owed and the bid being paid.
    async fn purchase_terms(
        &self,
        ticket: &Ticket,
        source: &PurchaseSource,
        now: DateTime<Utc>,
    ) -> TicketResult<(i64, Option<Uuid>)> {
        if ticket.status != TicketStatus::Paid {
            return Err(TicketError::TicketNotEligible(format!(
                "ticket is {}",
                ticket.status.as_str()
            )));
        }
        if ticket.is_owned_by(&source.buyer_user_id) {
            return Err(TicketError::AlreadyOwnThisTicket);
        }
        let (price_naira, paid_bid_id) = match ticket.resale.status {
            ResaleStatus::None => {
                return Err(TicketError::TicketNotEligible("ticket is not listed for resale".to_string()))
            }
            ResaleStatus::OfferAccepted => {
                if ticket.resale.buyer_user_id.as_deref() != Some(source.buyer_user_id.as_str()) {
                    return Err(TicketError::TicketNotEligible(
                        "ticket is reserved for another buyer".to_string(),
                    ));
                }
                if source.accepted_bid_id.is_some() && source.accepted_bid_id != ticket.resale.accepted_bid_id {
                    return Err(TicketError::TicketNotEligible("accepted offer has changed".to_string()));
                }
                if ticket.resale.offer_lapsed(now) {
                    return Err(TicketError::OfferWindowExpired);
                }
                let bid_id = ticket
                    .resale
                    .accepted_bid_id
                    .ok_or_else(|| TicketError::TicketNotEligible("accepted offer has no bid".to_string()))?;
                let bid = self.bid_on(ticket, bid_id).await?;
                (bid.amount_naira, Some(bid_id))
            }
            ResaleStatus::Listed => {
                if ticket.resale.allow_bids {
                    return Err(TicketError::BiddingRequired);
                }
                let price = ticket
                    .resale
                    .price_naira
                    .ok_or_else(|| TicketError::TicketNotEligible("listing has no price".to_string()))?;
                (price, None)
            }
        };

        // Paid amount must cover the price
        let required = price_naira.saturating_mul(100);
        if source.paid_minor_units < required {
            return Err(TicketError::AmountMismatch {
                expected: required,
                paid: source.paid_minor_units,
            });
        }
        Ok((price_naira, paid_bid_id))
    }

    async fn transfer_full(
        &self,
        ticket: &Ticket,
        source: &PurchaseSource,
        paid_bid_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> TicketResult<Option<Ticket>> {
        let mut next = ticket.clone();
        next.buyer_user_id = source.buyer_user_id.clone();
        next.barcode_value = TicketCodeAllocator::barcode();
        next.payment_provider = Some(source.provider.clone());
        next.payment_reference = Some(source.reference.clone());
        next.verified_at = Some(now);
        next.clear_resale();

        let transfer = ResaleTransfer {
            source: next,
            sibling: None,
            paid_bid_id,
            at: now,
        };
        match self.ctx.tickets.apply_resale_transfer(&transfer).await {
            Ok(true) => self.fetch(ticket.id).await.map(Some),
            Ok(false) => Ok(None),
            Err(e) if e.is_duplicate_of(TICKET_PAYMENT_REFERENCE_CONSTRAINT) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Splits `quantity` seats into a new ticket for the buyer. Price shares are
    /// proportional and the two totals always add up to the original.
    async fn transfer_partial(
        &self,
        ticket: &Ticket,
        quantity: i32,
        source: &PurchaseSource,
        paid_bid_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> TicketResult<Option<Ticket>> {
        let sibling_total = ticket.total_price_naira * quantity as i64 / ticket.quantity as i64;

        let mut remaining = ticket.clone();
        remaining.quantity -= quantity;
        remaining.total_price_naira -= sibling_total;
        remaining.clear_resale();

        let template = Ticket {
            id: Uuid::new_v4(),
            event_id: ticket.event_id,
            category: ticket.category.clone(),
            buyer_user_id: source.buyer_user_id.clone(),
            organizer_user_id: ticket.organizer_user_id.clone(),
            quantity,
            unit_price_naira: ticket.unit_price_naira,
            total_price_naira: sibling_total,
            currency: ticket.currency.clone(),
            status: TicketStatus::Paid,
            payment_provider: Some(source.provider.clone()),
            payment_reference: Some(source.reference.clone()),
            ticket_code: String::new(),
            barcode_value: String::new(),
            occurrence_starts_at: ticket.occurrence_starts_at,
            occurrence_ends_at: ticket.occurrence_ends_at,
            paid_at: Some(now),
            verified_at: Some(now),
            cancelled_at: None,
            used_at: None,
            expired_at: None,
            used_by_user_id: None,
            resold_from_ticket_id: Some(ticket.id),
            resale: ResaleListing::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let repo = Arc::clone(&self.ctx.tickets);
        self.allocator
            .allocate(now, |code| {
                let mut sibling = template.clone();
                sibling.ticket_code = code;
                sibling.barcode_value = TicketCodeAllocator::barcode();
                let transfer = ResaleTransfer {
                    source: remaining.clone(),
                    sibling: Some(sibling.clone()),
                    paid_bid_id,
                    at: now,
                };
                let repo = Arc::clone(&repo);
                async move {
                    match repo.apply_resale_transfer(&transfer).await {
                        Ok(true) => Ok(Some(sibling)),
                        Ok(false) => Ok(None),
                        Err(e) if e.is_duplicate_of(TICKET_PAYMENT_REFERENCE_CONSTRAINT) => Ok(None),
                        Err(e) => Err::<Option<Ticket>, StoreError>(e),
                    }
                }
            })
            .await
    }
}
