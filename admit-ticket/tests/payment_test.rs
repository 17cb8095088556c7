mod common;

use admit_core::{AttemptStatus, FulfillmentStatus, GatewayVerification, StoreError, TicketStatus, WebhookOutcome};
use admit_shared::models::events::NotificationKind;
use admit_ticket::TicketError;
use chrono::Utc;
use common::*;

fn scripted(reference: &str, status: &str, amount: i64, currency: &str) -> GatewayVerification {
    GatewayVerification {
        reference: reference.to_string(),
        status: status.to_string(),
        amount_minor_units: amount,
        currency: currency.to_string(),
        raw: serde_json::json!({ "reference": reference, "status": status }),
    }
}

#[tokio::test]
async fn test_purchase_checkout_and_verify() {
    let h = harness();

    // 1. Reserve at the base price
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 2, None))
        .await
        .unwrap();
    assert_eq!(ticket.total_price_naira, 10_000);

    // 2. Checkout pins the reference and initializes in minor units
    let attempt = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();
    assert!(attempt.reference.starts_with("adm_pur_"));
    assert!(attempt.authorization_url.is_some());
    assert_eq!(h.gateway.initialized(&attempt.reference).unwrap().amount_minor_units, 1_000_000);
    let pinned = h.service.get_ticket(ticket.id, "buyer").await.unwrap();
    assert_eq!(pinned.payment_reference.as_deref(), Some(attempt.reference.as_str()));

    // 3. Verify flips the ticket to paid
    let outcome = h.service.verify_purchase(&attempt.reference, "buyer").await.unwrap();
    assert!(!outcome.already_verified);
    assert_eq!(outcome.status, AttemptStatus::Success);
    assert_eq!(outcome.ticket.status, TicketStatus::Paid);
    assert!(outcome.ticket.paid_at.is_some());

    // 4. Second verify is a no-op
    let again = h.service.verify_purchase(&attempt.reference, "buyer").await.unwrap();
    assert!(again.already_verified);
    assert_eq!(again.ticket.id, ticket.id);

    let stored = h.store.attempts().into_iter().next().unwrap();
    assert_eq!(stored.fulfillment_status, FulfillmentStatus::Done);
    assert_eq!(stored.fulfillment_ticket_id, Some(ticket.id));
    assert!(h.notifier.kinds_for("buyer").contains(&NotificationKind::TicketPaid));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reconciles_fulfil_once() {
    let h = harness();
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let reconciler = h.service.reconciler().clone();
        let reference = attempt.reference.clone();
        handles.push(tokio::spawn(async move {
            reconciler.reconcile(&reference, None, Utc::now()).await
        }));
    }

    let mut fresh = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.ticket.id, ticket.id);
        assert_eq!(outcome.ticket.status, TicketStatus::Paid);
        if !outcome.already_verified {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);
    let paid_notices = h
        .notifier
        .kinds_for("buyer")
        .into_iter()
        .filter(|k| *k == NotificationKind::TicketPaid)
        .count();
    assert_eq!(paid_notices, 1);
}

#[tokio::test]
async fn test_underpayment_and_currency_mismatch_are_rejected() {
    let h = harness();

    // 1. Underpaid by 1000 naira
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();
    h.gateway
        .script_outcome(scripted(&attempt.reference, "success", 400_000, "NGN"));
    let err = h.service.verify_purchase(&attempt.reference, "buyer").await.unwrap_err();
    assert!(matches!(err, TicketError::AmountMismatch { expected: 500_000, paid: 400_000 }));
    let stored = h.service.get_ticket(ticket.id, "buyer").await.unwrap();
    assert_eq!(stored.status, TicketStatus::Pending);

    // 2. Wrong currency
    let other = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer-2", 1, None))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(other.id, "buyer-2", &email("buyer-2"), None)
        .await
        .unwrap();
    h.gateway
        .script_outcome(scripted(&attempt.reference, "success", 500_000, "USD"));
    let err = h.service.verify_purchase(&attempt.reference, "buyer-2").await.unwrap_err();
    assert!(matches!(err, TicketError::CurrencyMismatch { .. }));

    let failed = h
        .store
        .attempts()
        .into_iter()
        .filter(|a| a.status == AttemptStatus::Failed)
        .count();
    assert_eq!(failed, 2);
}

#[tokio::test]
async fn test_overpayment_is_accepted_and_abandoned_is_not() {
    let h = harness();
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();

    h.gateway
        .script_outcome(scripted(&attempt.reference, "abandoned", 500_000, "NGN"));
    let err = h.service.verify_purchase(&attempt.reference, "buyer").await.unwrap_err();
    assert!(matches!(err, TicketError::PaymentNotCompleted(_)));
    let stored = h.store.attempts().into_iter().next().unwrap();
    assert_eq!(stored.status, AttemptStatus::Abandoned);

    // The buyer completes the same transaction later, paying a little extra
    h.gateway
        .script_outcome(scripted(&attempt.reference, "success", 500_100, "NGN"));
    let outcome = h.service.verify_purchase(&attempt.reference, "buyer").await.unwrap();
    assert_eq!(outcome.ticket.status, TicketStatus::Paid);
}

#[tokio::test]
async fn test_gateway_initialize_failure_cancels_reservation() {
    let h = harness();
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();

    h.gateway.set_fail_initialize(true);
    let err = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::Gateway(_)));
    assert!(err.is_retryable());

    let stored = h.service.get_ticket(ticket.id, "buyer").await.unwrap();
    assert_eq!(stored.status, TicketStatus::Cancelled);
    let attempt = h.store.attempts().into_iter().next().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert!(attempt.failure_reason.is_some());
}

#[tokio::test]
async fn test_checkout_requires_owner_and_pending_ticket() {
    let h = harness();
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();

    let err = h
        .service
        .begin_purchase_checkout(ticket.id, "someone-else", &email("someone-else"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::NotOwner | TicketError::NotFound(_)));

    let err = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", "not-an-email", None)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::Validation(_)));

    let paid = paid_ticket(&h, "holder", 1).await;
    let err = h
        .service
        .begin_purchase_checkout(paid.id, "holder", &email("holder"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::TicketNotEligible(_)));
}

#[tokio::test]
async fn test_verify_is_scoped_to_buyer_and_route() {
    let h = harness();
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();

    let err = h.service.verify_purchase(&attempt.reference, "intruder").await.unwrap_err();
    assert!(matches!(err, TicketError::NotFound(_)));

    let err = h
        .service
        .verify_resale_purchase(&attempt.reference, "buyer")
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::Validation(_)));

    let err = h.service.verify_purchase("adm_pur_unknown", "buyer").await.unwrap_err();
    assert!(matches!(err, TicketError::NotFound(_)));
    assert_eq!(h.gateway.verify_calls(), 0);
}

#[tokio::test]
async fn test_webhook_then_verify_reports_already_verified() {
    let h = harness();
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();

    // 1. Signed charge.success delivery
    let body = charge_success_body(&attempt.reference, 500_000);
    let signature = h.gateway.sign(&body);
    let ack = h.service.handle_gateway_event(&body, Some(&signature)).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Processed);
    assert_eq!(ack.reference.as_deref(), Some(attempt.reference.as_str()));
    assert_eq!(h.gateway.verify_calls(), 0);

    // 2. Buyer returns from the checkout page
    let outcome = h.service.verify_purchase(&attempt.reference, "buyer").await.unwrap();
    assert!(outcome.already_verified);
    assert_eq!(outcome.ticket.status, TicketStatus::Paid);

    // 3. Redelivery
    let ack = h.service.handle_gateway_event(&body, Some(&signature)).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::AlreadyProcessed);

    let log: Vec<_> = h.store.webhook_log().into_iter().map(|e| e.outcome).collect();
    assert_eq!(log, vec![WebhookOutcome::Processed, WebhookOutcome::AlreadyProcessed]);
}

#[tokio::test]
async fn test_webhook_signature_and_payload_handling() {
    let h = harness();

    // 1. Bad or missing signatures never reach the reconciler
    let body = charge_success_body("adm_pur_x", 500_000);
    let err = h
        .service
        .handle_gateway_event(&body, Some("deadbeef"))
        .await
        .unwrap_err();
    assert!(matches!(err, TicketError::InvalidSignature));
    let err = h.service.handle_gateway_event(&body, None).await.unwrap_err();
    assert!(matches!(err, TicketError::InvalidSignature));

    // 2. Other event types are acknowledged and ignored
    let transfer = serde_json::to_vec(&serde_json::json!({
        "event": "transfer.success",
        "data": { "reference": "trf_1" }
    }))
    .unwrap();
    let ack = h
        .service
        .handle_gateway_event(&transfer, Some(&h.gateway.sign(&transfer)))
        .await
        .unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Ignored);

    // 3. Unparseable bodies are acknowledged as malformed
    let garbage = b"not json".to_vec();
    let ack = h
        .service
        .handle_gateway_event(&garbage, Some(&h.gateway.sign(&garbage)))
        .await
        .unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Malformed);

    // 4. Unknown reference is a handled failure, not a retry
    let ack = h
        .service
        .handle_gateway_event(&body, Some(&h.gateway.sign(&body)))
        .await
        .unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::HandledFailure);

    let log = h.store.webhook_log();
    assert_eq!(log.len(), 5);
    assert_eq!(
        log.iter()
            .filter(|e| e.outcome == WebhookOutcome::RejectedSignature && !e.signature_valid)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_webhook_transient_failure_asks_for_redelivery() {
    let h = harness();
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();
    let body = charge_success_body(&attempt.reference, 500_000);
    let signature = h.gateway.sign(&body);

    // 1. Store hiccup on the first delivery
    h.store
        .fail_next("get_by_reference", StoreError::Unavailable("connection reset".to_string()));
    let err = h.service.handle_gateway_event(&body, Some(&signature)).await.unwrap_err();
    assert!(err.is_retryable());
    let pending = h.service.get_ticket(ticket.id, "buyer").await.unwrap();
    assert_eq!(pending.status, TicketStatus::Pending);

    // 2. Redelivery succeeds
    let ack = h.service.handle_gateway_event(&body, Some(&signature)).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Processed);

    let outcomes: Vec<_> = h.store.webhook_log().into_iter().map(|e| e.outcome).collect();
    assert_eq!(outcomes, vec![WebhookOutcome::RetryableFailure, WebhookOutcome::Processed]);
}

#[tokio::test]
async fn test_late_payment_for_expired_reservation_is_not_fulfilled() {
    let h = harness();
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(ticket.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();

    // Cancelled out from under the attempt
    let mut cancelled = h.service.get_ticket(ticket.id, "buyer").await.unwrap();
    cancelled.status = TicketStatus::Cancelled;
    cancelled.cancelled_at = Some(Utc::now());
    h.store.seed_ticket(cancelled);

    let err = h.service.verify_purchase(&attempt.reference, "buyer").await.unwrap_err();
    assert!(matches!(err, TicketError::TicketNotEligible(_)));
    let stored = h.store.attempts().into_iter().next().unwrap();
    assert_eq!(stored.status, AttemptStatus::Success);
    assert_eq!(stored.fulfillment_status, FulfillmentStatus::Failed);
}

#[tokio::test]
async fn test_late_payment_cannot_reclaim_resold_seats() {
    let h = harness();

    // 1. Buyer A holds both Regular seats and opens a checkout
    let held = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer-a", 2, Some("Regular")))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(held.id, "buyer-a", &email("buyer-a"), None)
        .await
        .unwrap();

    // 2. The hold goes stale and buyer B buys the same seats
    h.store.backdate_ticket(held.id, Utc::now() - chrono::Duration::minutes(45));
    let other = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer-b", 2, Some("Regular")))
        .await
        .unwrap();
    let other_attempt = h
        .service
        .begin_purchase_checkout(other.id, "buyer-b", &email("buyer-b"), None)
        .await
        .unwrap();
    h.service
        .verify_purchase(&other_attempt.reference, "buyer-b")
        .await
        .unwrap();

    // 3. A's payment arrives afterwards
    let body = charge_success_body(&attempt.reference, 200_000);
    let ack = h
        .service
        .handle_gateway_event(&body, Some(&h.gateway.sign(&body)))
        .await
        .unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::HandledFailure);

    let err = h.service.verify_purchase(&attempt.reference, "buyer-a").await.unwrap_err();
    assert!(matches!(err, TicketError::CapacityExceeded { requested: 2, remaining: 0 }));

    let paid_seats: i32 = h
        .store
        .tickets()
        .iter()
        .filter(|t| t.category.as_deref() == Some("Regular") && t.status.is_sold())
        .map(|t| t.quantity)
        .sum();
    assert_eq!(paid_seats, 2);
    let late = h
        .store
        .attempts()
        .into_iter()
        .find(|a| a.reference == attempt.reference)
        .unwrap();
    assert_eq!(late.status, AttemptStatus::Success);
    assert_eq!(late.fulfillment_status, FulfillmentStatus::Failed);
}

#[tokio::test]
async fn test_late_payment_is_fulfilled_while_seats_remain() {
    let h = harness();
    let held = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 2, Some("Regular")))
        .await
        .unwrap();
    let attempt = h
        .service
        .begin_purchase_checkout(held.id, "buyer", &email("buyer"), None)
        .await
        .unwrap();
    h.store.backdate_ticket(held.id, Utc::now() - chrono::Duration::minutes(45));

    let outcome = h.service.verify_purchase(&attempt.reference, "buyer").await.unwrap();
    assert_eq!(outcome.ticket.status, TicketStatus::Paid);
}

#[tokio::test]
async fn test_legacy_reference_without_ledger_row() {
    let h = harness();
    let ticket = h
        .service
        .reserve_ticket(reserve_request(&h, "buyer", 1, None))
        .await
        .unwrap();

    let mut legacy = h.service.get_ticket(ticket.id, "buyer").await.unwrap();
    legacy.payment_provider = Some("paystack".to_string());
    legacy.payment_reference = Some("legacy-ref-001".to_string());
    h.store.seed_ticket(legacy);
    h.gateway
        .script_outcome(scripted("legacy-ref-001", "success", 500_000, "NGN"));

    let outcome = h.service.verify_purchase("legacy-ref-001", "buyer").await.unwrap();
    assert!(!outcome.already_verified);
    assert_eq!(outcome.ticket.status, TicketStatus::Paid);

    let again = h.service.verify_purchase("legacy-ref-001", "buyer").await.unwrap();
    assert!(again.already_verified);
    assert!(h.store.attempts().is_empty());

    // Someone else holding the reference learns nothing about the ticket
    let err = h.service.verify_purchase("legacy-ref-001", "intruder").await.unwrap_err();
    assert!(matches!(err, TicketError::NotFound(_)));
}
