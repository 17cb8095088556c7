mod common;

use admit_core::{BidStatus, FulfillmentStatus, ResaleStatus, TicketStatus, TicketingRules, WebhookOutcome};
use admit_shared::models::events::NotificationKind;
use admit_ticket::{ListingRequest, ResaleCheckoutOutcome, TicketError};
use chrono::{Duration, Utc};
use common::*;

fn listing(price_naira: i64, quantity: Option<i32>, allow_bids: bool) -> ListingRequest {
    ListingRequest {
        price_naira,
        quantity,
        allow_bids,
    }
}

fn pending_reference(outcome: ResaleCheckoutOutcome) -> String {
    match outcome {
        ResaleCheckoutOutcome::Pending { attempt } => attempt.reference,
        ResaleCheckoutOutcome::Completed { .. } => panic!("expected a gateway checkout"),
    }
}

#[tokio::test]
async fn test_bid_acceptance_and_window_expiry() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;

    // 1. List with bids
    let listed = h
        .service
        .list_resale(ticket.id, "seller", listing(5000, None, true))
        .await
        .unwrap();
    assert_eq!(listed.resale.status, ResaleStatus::Listed);

    // 2. Two offers
    let bid_a = h.service.place_bid(ticket.id, "bidder-a", 4000).await.unwrap();
    let bid_b = h.service.place_bid(ticket.id, "bidder-b", 4500).await.unwrap();
    assert_eq!(bid_a.status, BidStatus::Open);

    // 3. Accepting B rejects A
    let (offered, accepted) = h.service.accept_bid(ticket.id, "seller", bid_b.id).await.unwrap();
    assert_eq!(offered.resale.status, ResaleStatus::OfferAccepted);
    assert_eq!(offered.resale.buyer_user_id.as_deref(), Some("bidder-b"));
    assert_eq!(accepted.status, BidStatus::Accepted);
    let window = offered.resale.accepted_bid_expires_at.unwrap() - Utc::now();
    assert!(window > Duration::hours(23) && window <= Duration::hours(24));

    let bids = h.service.list_bids(ticket.id, "seller").await.unwrap();
    let a = bids.iter().find(|b| b.id == bid_a.id).unwrap();
    assert_eq!(a.status, BidStatus::Rejected);
    assert!(h.notifier.kinds_for("bidder-a").contains(&NotificationKind::ResaleBidRejected));
    assert!(h.notifier.kinds_for("bidder-b").contains(&NotificationKind::ResaleBidAccepted));

    // 4. Nobody else can buy during the window
    let err = h
        .service
        .begin_resale_checkout(ticket.id, "bidder-c", &email("bidder-c"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::TicketNotEligible(_)));

    // 5. Window lapses; the sweeper reopens the listing
    let report = h.service.sweeper().sweep_once(Utc::now() + Duration::hours(25)).await;
    assert_eq!(report.expired_offers, 1);
    let reopened = h.service.get_ticket(ticket.id, "seller").await.unwrap();
    assert_eq!(reopened.resale.status, ResaleStatus::Listed);
    assert!(reopened.resale.accepted_bid_id.is_none());
    assert_eq!(reopened.resale.price_naira, Some(5000));

    let bids = h.service.list_bids(ticket.id, "bidder-b").await.unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].status, BidStatus::Expired);
    assert!(h.notifier.kinds_for("bidder-b").contains(&NotificationKind::ResaleOfferExpired));
}

#[tokio::test]
async fn test_reserved_buyer_after_lapse_gets_window_expired() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;
    h.service
        .list_resale(ticket.id, "seller", listing(5000, None, true))
        .await
        .unwrap();
    let bid = h.service.place_bid(ticket.id, "bidder", 4800).await.unwrap();
    h.service.accept_bid(ticket.id, "seller", bid.id).await.unwrap();

    let later = Utc::now() + Duration::hours(25);
    let err = h
        .service
        .marketplace()
        .begin_resale_checkout(ticket.id, "bidder", &email("bidder"), None, later)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::OfferWindowExpired));

    // Expired lazily on the way out
    let current = h.service.get_ticket(ticket.id, "seller").await.unwrap();
    assert_eq!(current.resale.status, ResaleStatus::Listed);
}

#[tokio::test]
async fn test_accepted_bid_checkout_transfers_ticket() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;
    h.service
        .list_resale(ticket.id, "seller", listing(5500, None, true))
        .await
        .unwrap();
    let bid = h.service.place_bid(ticket.id, "buyer", 5200).await.unwrap();
    h.service.accept_bid(ticket.id, "seller", bid.id).await.unwrap();

    // 1. Checkout is for the bid amount
    let outcome = h
        .service
        .begin_resale_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();
    let reference = pending_reference(outcome);
    assert!(reference.starts_with("adm_rsl_"));
    assert_eq!(h.gateway.initialized(&reference).unwrap().amount_minor_units, 520_000);

    // 2. Verify transfers the whole ticket
    let outcome = h.service.verify_resale_purchase(&reference, "buyer").await.unwrap();
    assert!(!outcome.already_verified);
    let transferred = outcome.ticket;
    assert_eq!(transferred.id, ticket.id);
    assert_eq!(transferred.buyer_user_id, "buyer");
    assert_eq!(transferred.status, TicketStatus::Paid);
    assert_eq!(transferred.resale.status, ResaleStatus::None);
    assert_eq!(transferred.payment_reference.as_deref(), Some(reference.as_str()));
    assert_ne!(transferred.barcode_value, ticket.barcode_value);

    // 3. Bid closed out, both sides told
    let bids = h.service.list_bids(ticket.id, "buyer").await.unwrap();
    assert_eq!(bids[0].status, BidStatus::Paid);
    assert!(h.notifier.kinds_for("seller").contains(&NotificationKind::ResaleSold));
    assert!(h.notifier.kinds_for("buyer").contains(&NotificationKind::ResalePurchased));

    // 4. The old owner can no longer see or resell it
    assert!(matches!(
        h.service.get_ticket(ticket.id, "seller").await,
        Err(TicketError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_partial_resale_splits_ticket() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 3).await;
    assert_eq!(ticket.total_price_naira, 15_000);

    h.service
        .list_resale(ticket.id, "seller", listing(5500, Some(1), false))
        .await
        .unwrap();
    let outcome = h
        .service
        .begin_resale_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();
    let reference = pending_reference(outcome);
    let sibling = h
        .service
        .verify_resale_purchase(&reference, "buyer")
        .await
        .unwrap()
        .ticket;

    // 1. Buyer gets a new ticket for one seat
    assert_ne!(sibling.id, ticket.id);
    assert_eq!(sibling.buyer_user_id, "buyer");
    assert_eq!(sibling.quantity, 1);
    assert_eq!(sibling.total_price_naira, 5_000);
    assert_eq!(sibling.resold_from_ticket_id, Some(ticket.id));
    assert_ne!(sibling.ticket_code, ticket.ticket_code);
    assert_eq!(sibling.status, TicketStatus::Paid);

    // 2. Seller keeps the rest, delisted
    let remaining = h.service.get_ticket(ticket.id, "seller").await.unwrap();
    assert_eq!(remaining.quantity, 2);
    assert_eq!(remaining.total_price_naira, 10_000);
    assert_eq!(remaining.resale.status, ResaleStatus::None);

    // 3. Seats and value are conserved
    let tickets = h.store.tickets();
    assert_eq!(tickets.iter().map(|t| t.quantity).sum::<i32>(), 3);
    assert_eq!(tickets.iter().map(|t| t.total_price_naira).sum::<i64>(), 15_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resale_reconciles_transfer_once() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 2).await;
    h.service
        .list_resale(ticket.id, "seller", listing(5000, Some(1), false))
        .await
        .unwrap();
    let reference = pending_reference(
        h.service
            .begin_resale_checkout(ticket.id, "buyer", &email("buyer"), None)
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..6 {
        let reconciler = h.service.reconciler().clone();
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            reconciler.reconcile(&reference, None, Utc::now()).await
        }));
    }

    let mut fresh = 0;
    let mut sibling_ids = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if !outcome.already_verified {
            fresh += 1;
        }
        sibling_ids.push(outcome.ticket.id);
    }
    sibling_ids.dedup();
    assert_eq!(fresh, 1);
    assert_eq!(sibling_ids.len(), 1);
    assert_eq!(h.store.tickets().len(), 2);
}

#[tokio::test]
async fn test_contended_transfer_webhook_is_redelivered() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;
    h.service
        .list_resale(ticket.id, "seller", listing(5000, None, false))
        .await
        .unwrap();
    let reference = pending_reference(
        h.service
            .begin_resale_checkout(ticket.id, "buyer", &email("buyer"), None)
            .await
            .unwrap(),
    );
    let body = charge_success_body(&reference, 500_000);
    let signature = h.gateway.sign(&body);

    // 1. The transfer write loses its race; the gateway is asked to retry
    h.store.lose_next_write("apply_resale_transfer");
    let err = h.service.handle_gateway_event(&body, Some(&signature)).await.unwrap_err();
    assert!(matches!(err, TicketError::TransferContended));
    assert!(err.is_retryable());
    let untouched = h.service.get_ticket(ticket.id, "seller").await.unwrap();
    assert_eq!(untouched.buyer_user_id, "seller");

    // 2. Redelivery completes the transfer
    let ack = h.service.handle_gateway_event(&body, Some(&signature)).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Processed);
    let transferred = h.service.get_ticket(ticket.id, "buyer").await.unwrap();
    assert_eq!(transferred.buyer_user_id, "buyer");

    let outcomes: Vec<_> = h.store.webhook_log().into_iter().map(|e| e.outcome).collect();
    assert_eq!(outcomes, vec![WebhookOutcome::RetryableFailure, WebhookOutcome::Processed]);
}

#[tokio::test]
async fn test_listing_rules() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;

    // 1. Markup cap is 20% over face value
    let err = h
        .service
        .list_resale(ticket.id, "seller", listing(6500, None, false))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::PriceExceedsCap { price: 6500, cap: 6000 }));

    // 2. Only the holder lists
    let err = h
        .service
        .list_resale(ticket.id, "stranger", listing(5000, None, false))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::NotOwner));

    // 3. Quantity within the ticket
    let err = h
        .service
        .list_resale(ticket.id, "seller", listing(5000, Some(2), false))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::Validation(_)));

    // 4. Unpaid tickets cannot be resold
    let pending = h
        .service
        .reserve_ticket(reserve_request(&h, "seller", 1, None))
        .await
        .unwrap();
    let err = h
        .service
        .list_resale(pending.id, "seller", listing(5000, None, false))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::TicketNotEligible(_)));
}

#[tokio::test]
async fn test_resale_disabled_for_event() {
    let mut event = sample_event();
    event.resale.enabled = false;
    let h = harness_with(TicketingRules::default(), event);
    let ticket = paid_ticket(&h, "seller", 1).await;

    let err = h
        .service
        .list_resale(ticket.id, "seller", listing(5000, None, false))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::ResaleDisabled));
}

#[tokio::test]
async fn test_bidding_rules() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;

    // 1. Not listed yet
    let err = h.service.place_bid(ticket.id, "bidder", 4000).await.unwrap_err();
    assert!(matches!(err, TicketError::TicketNotEligible(_)));

    h.service
        .list_resale(ticket.id, "seller", listing(5000, None, true))
        .await
        .unwrap();

    // 2. Owner cannot bid or buy
    let err = h.service.place_bid(ticket.id, "seller", 4000).await.unwrap_err();
    assert!(matches!(err, TicketError::AlreadyOwnThisTicket));
    let err = h
        .service
        .begin_resale_checkout(ticket.id, "seller", &email("seller"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::AlreadyOwnThisTicket));

    // 3. Bids are capped at the asking price
    let err = h.service.place_bid(ticket.id, "bidder", 5001).await.unwrap_err();
    assert!(matches!(err, TicketError::Validation(_)));

    // 4. Bid-only listings cannot be bought outright
    let err = h
        .service
        .begin_resale_checkout(ticket.id, "bidder", &email("bidder"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::BiddingRequired));

    // 5. Re-bidding updates the one open bid
    let first = h.service.place_bid(ticket.id, "bidder", 3000).await.unwrap();
    let second = h.service.place_bid(ticket.id, "bidder", 3500).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.amount_naira, 3500);
    assert_eq!(h.service.list_bids(ticket.id, "bidder").await.unwrap().len(), 1);

    // 6. Other bidders only see their own
    h.service.place_bid(ticket.id, "other", 3200).await.unwrap();
    assert_eq!(h.service.list_bids(ticket.id, "other").await.unwrap().len(), 1);
    assert_eq!(h.service.list_bids(ticket.id, "seller").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_relisting_rejects_open_bids_and_reject_bid() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;
    h.service
        .list_resale(ticket.id, "seller", listing(5000, None, true))
        .await
        .unwrap();
    let a = h.service.place_bid(ticket.id, "bidder-a", 4000).await.unwrap();
    let b = h.service.place_bid(ticket.id, "bidder-b", 4100).await.unwrap();

    let rejected = h.service.reject_bid(ticket.id, "seller", a.id).await.unwrap();
    assert_eq!(rejected.status, BidStatus::Rejected);
    let err = h.service.reject_bid(ticket.id, "seller", a.id).await.unwrap_err();
    assert!(matches!(err, TicketError::TicketNotEligible(_)));

    // Cancelling the listing closes the remaining bid
    let delisted = h.service.cancel_resale_listing(ticket.id, "seller").await.unwrap();
    assert_eq!(delisted.resale.status, ResaleStatus::None);
    let bids = h.service.list_bids(ticket.id, "bidder-b").await.unwrap();
    assert_eq!(bids[0].id, b.id);
    assert_eq!(bids[0].status, BidStatus::Rejected);
}

#[tokio::test]
async fn test_withdrawing_accepted_bid_reopens_listing() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;
    h.service
        .list_resale(ticket.id, "seller", listing(5000, None, true))
        .await
        .unwrap();
    let bid = h.service.place_bid(ticket.id, "bidder", 4500).await.unwrap();
    h.service.accept_bid(ticket.id, "seller", bid.id).await.unwrap();

    let err = h.service.withdraw_bid(ticket.id, "someone", bid.id).await.unwrap_err();
    assert!(matches!(err, TicketError::NotFound(_)));

    let withdrawn = h.service.withdraw_bid(ticket.id, "bidder", bid.id).await.unwrap();
    assert_eq!(withdrawn.status, BidStatus::Withdrawn);
    let current = h.service.get_ticket(ticket.id, "seller").await.unwrap();
    assert_eq!(current.resale.status, ResaleStatus::Listed);
    assert!(current.resale.buyer_user_id.is_none());
}

#[tokio::test]
async fn test_direct_purchase_reservation_released_on_gateway_failure() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;
    h.service
        .list_resale(ticket.id, "seller", listing(5000, None, false))
        .await
        .unwrap();

    h.gateway.set_fail_initialize(true);
    let err = h
        .service
        .begin_resale_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::Gateway(_)));

    let current = h.service.get_ticket(ticket.id, "seller").await.unwrap();
    assert_eq!(current.status, TicketStatus::Paid);
    assert_eq!(current.resale.status, ResaleStatus::Listed);
    assert!(current.resale.accepted_bid_id.is_none());
    let bids = h.service.list_bids(ticket.id, "buyer").await.unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].status, BidStatus::Withdrawn);

    // A second buyer can still go through once the gateway recovers
    h.gateway.set_fail_initialize(false);
    let outcome = h
        .service
        .begin_resale_checkout(ticket.id, "buyer-2", &email("buyer-2"), None)
        .await
        .unwrap();
    assert!(matches!(outcome, ResaleCheckoutOutcome::Pending { .. }));
}

#[tokio::test]
async fn test_direct_purchase_reserves_listing_for_first_buyer() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;
    h.service
        .list_resale(ticket.id, "seller", listing(5000, None, false))
        .await
        .unwrap();

    // 1. First buyer takes the listing straight to checkout
    let reference = pending_reference(
        h.service
            .begin_resale_checkout(ticket.id, "buyer-a", &email("buyer-a"), None)
            .await
            .unwrap(),
    );
    let held = h.service.get_ticket(ticket.id, "seller").await.unwrap();
    assert_eq!(held.resale.status, ResaleStatus::OfferAccepted);
    assert_eq!(held.resale.buyer_user_id.as_deref(), Some("buyer-a"));

    // 2. Second buyer is turned away while the hold lasts
    let err = h
        .service
        .begin_resale_checkout(ticket.id, "buyer-b", &email("buyer-b"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::TicketNotEligible(_)));
    let still_held = h.service.get_ticket(ticket.id, "seller").await.unwrap();
    assert_eq!(still_held.resale.status, ResaleStatus::OfferAccepted);
    assert_eq!(still_held.resale.buyer_user_id.as_deref(), Some("buyer-a"));
    assert_eq!(still_held.version, held.version);

    // 3. The holder completes the purchase
    let outcome = h.service.verify_resale_purchase(&reference, "buyer-a").await.unwrap();
    assert_eq!(outcome.ticket.buyer_user_id, "buyer-a");
}

#[tokio::test]
async fn test_lapsed_direct_purchase_cannot_take_a_newer_hold() {
    let h = harness();
    let ticket = paid_ticket(&h, "seller", 1).await;
    h.service
        .list_resale(ticket.id, "seller", listing(5000, None, false))
        .await
        .unwrap();

    // 1. Buyer B holds the listing, then lets the window lapse
    let stale_reference = pending_reference(
        h.service
            .begin_resale_checkout(ticket.id, "buyer-b", &email("buyer-b"), None)
            .await
            .unwrap(),
    );
    let later = Utc::now() + Duration::hours(25);

    // 2. Buyer A picks the listing up after the lapse
    let outcome = h
        .service
        .marketplace()
        .begin_resale_checkout(ticket.id, "buyer-a", &email("buyer-a"), None, later)
        .await
        .unwrap();
    assert!(matches!(outcome, ResaleCheckoutOutcome::Pending { .. }));

    // 3. B's old payment lands and is refused
    let err = h
        .service
        .reconciler()
        .reconcile(&stale_reference, None, later)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::TicketNotEligible(_)));

    let current = h.service.get_ticket(ticket.id, "seller").await.unwrap();
    assert_eq!(current.buyer_user_id, "seller");
    assert_eq!(current.resale.status, ResaleStatus::OfferAccepted);
    assert_eq!(current.resale.buyer_user_id.as_deref(), Some("buyer-a"));
    let stale = h
        .store
        .attempts()
        .into_iter()
        .find(|a| a.reference == stale_reference)
        .unwrap();
    assert_eq!(stale.fulfillment_status, FulfillmentStatus::Failed);
}

#[tokio::test]
async fn test_payment_bypass_completes_resale_immediately() {
    let rules = TicketingRules {
        payment_bypass: true,
        ..TicketingRules::default()
    };
    let h = harness_with(rules, sample_event());
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "seller", 1, None))
        .await
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Paid);

    h.service
        .list_resale(ticket.id, "seller", listing(5000, None, false))
        .await
        .unwrap();
    let outcome = h
        .service
        .begin_resale_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();
    match outcome {
        ResaleCheckoutOutcome::Completed { ticket: transferred } => {
            assert_eq!(transferred.buyer_user_id, "buyer");
            assert_eq!(transferred.payment_provider.as_deref(), Some("bypass"));
        }
        ResaleCheckoutOutcome::Pending { .. } => panic!("bypass should not reach the gateway"),
    }
    assert!(h.store.attempts().is_empty());
}
