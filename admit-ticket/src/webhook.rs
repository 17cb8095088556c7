use admit_core::{GatewayVerification, WebhookLogEntry, WebhookOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::TicketingContext;
use crate::error::{TicketError, TicketResult};
use crate::reconciler::PaymentReconciler;

pub const CHARGE_SUCCESS: &str = "charge.success";

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub outcome: WebhookOutcome,
    pub reference: Option<String>,
}

/// Inbound gateway events. Every delivery is logged before it is acknowledged.
pub struct GatewayEventHandler {
    ctx: TicketingContext,
    reconciler: Arc<PaymentReconciler>,
}

impl GatewayEventHandler {
    pub fn new(ctx: TicketingContext, reconciler: Arc<PaymentReconciler>) -> Self {
        Self { ctx, reconciler }
    }

    /// `Ok` tells the gateway to stop redelivering; `Err` asks it to retry
    /// (or, for a bad signature, rejects the request outright).
    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> TicketResult<WebhookAck> {
        let provider = self.ctx.gateway.provider().to_string();

        // 1. Signature over the untouched body, before any parsing
        let signature_valid = signature
            .map(|sig| self.ctx.gateway.validate_webhook_signature(raw_body, sig))
            .unwrap_or(false);
        if !signature_valid {
            let mut entry = WebhookLogEntry::new(&provider, false, WebhookOutcome::RejectedSignature, now);
            entry.detail = Some(if signature.is_some() { "signature mismatch" } else { "signature missing" }.to_string());
            if let Err(e) = self.ctx.webhooks.record_webhook(&entry).await {
                warn!("Failed to log rejected webhook: {}", e);
            }
            warn!(provider = %provider, "Webhook rejected: invalid signature");
            return Err(TicketError::InvalidSignature);
        }

        // 2. Parse
        let body: serde_json::Value = match serde_json::from_slice(raw_body) {
            Ok(body) => body,
            Err(e) => {
                let mut entry = WebhookLogEntry::new(&provider, true, WebhookOutcome::Malformed, now);
                entry.detail = Some(e.to_string());
                return self.acknowledge(entry).await;
            }
        };
        let event_type = body.get("event").and_then(|v| v.as_str()).map(str::to_string);
        let data = body.get("data").cloned().unwrap_or(serde_json::Value::Null);
        let reference = data.get("reference").and_then(|v| v.as_str()).map(str::to_string);

        let mut entry = WebhookLogEntry::new(&provider, true, WebhookOutcome::Ignored, now);
        entry.event_type = event_type.clone();
        entry.reference = reference.clone();

        if event_type.as_deref() != Some(CHARGE_SUCCESS) {
            entry.detail = Some("event type not handled".to_string());
            return self.acknowledge(entry).await;
        }
        let Some(verification) = Self::verification_from(&data) else {
            entry.outcome = WebhookOutcome::Malformed;
            entry.detail = Some("charge payload missing reference, status, amount or currency".to_string());
            return self.acknowledge(entry).await;
        };

        // 3. Reconcile with the event data as the authoritative payload
        let charge_reference = verification.reference.clone();
        match self
            .reconciler
            .reconcile(&charge_reference, Some(verification), now)
            .await
        {
            Ok(outcome) => {
                entry.outcome = if outcome.already_verified {
                    WebhookOutcome::AlreadyProcessed
                } else {
                    WebhookOutcome::Processed
                };
                entry.detail = Some(format!("ticket {}", outcome.ticket.id));
                self.acknowledge(entry).await
            }
            Err(e) if e.is_retryable() => {
                entry.outcome = WebhookOutcome::RetryableFailure;
                entry.detail = Some(e.to_string());
                if let Err(log_err) = self.ctx.webhooks.record_webhook(&entry).await {
                    warn!("Failed to log webhook: {}", log_err);
                }
                warn!(reference = ?entry.reference, "Webhook processing failed, gateway will redeliver: {}", e);
                Err(e)
            }
            Err(e) => {
                entry.outcome = WebhookOutcome::HandledFailure;
                entry.detail = Some(e.to_string());
                warn!(reference = ?entry.reference, "Webhook acknowledged with failure: {}", e);
                self.acknowledge(entry).await
            }
        }
    }

    /// Logs the delivery; only a durable log entry lets us acknowledge.
    async fn acknowledge(&self, entry: WebhookLogEntry) -> TicketResult<WebhookAck> {
        self.ctx.webhooks.record_webhook(&entry).await?;
        info!(
            outcome = entry.outcome.as_str(),
            event_type = ?entry.event_type,
            reference = ?entry.reference,
            "Webhook processed"
        );
        Ok(WebhookAck {
            outcome: entry.outcome,
            reference: entry.reference,
        })
    }

    fn verification_from(data: &serde_json::Value) -> Option<GatewayVerification> {
        Some(GatewayVerification {
            reference: data.get("reference")?.as_str()?.to_string(),
            status: data.get("status")?.as_str()?.to_string(),
            amount_minor_units: data.get("amount")?.as_i64()?,
            currency: data.get("currency")?.as_str()?.to_string(),
            raw: data.clone(),
        })
    }
}
