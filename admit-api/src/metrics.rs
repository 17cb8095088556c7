use admit_ticket::{ErrorKind, ReconcileOutcome, TicketError, WebhookAck};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};

use crate::state::AppState;

/// Payment counters exposed on `/metrics`.
pub struct Metrics {
    registry: Registry,
    pub reconciliations: IntCounterVec,
    pub webhooks: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new("admit_reconciliations_total", "Payment verifications by outcome"),
            &["kind", "outcome"],
        )?;
        let webhooks = IntCounterVec::new(
            Opts::new("admit_webhooks_total", "Gateway webhook deliveries by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(webhooks.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            webhooks,
        })
    }

    pub fn observe_reconcile(&self, kind: &str, result: &Result<ReconcileOutcome, TicketError>) {
        let outcome = match result {
            Ok(o) if o.already_verified => "already_verified",
            Ok(_) => "fulfilled",
            Err(e) => error_label(e.kind()),
        };
        self.reconciliations.with_label_values(&[kind, outcome]).inc();
    }

    pub fn observe_webhook(&self, result: &Result<WebhookAck, TicketError>) {
        let outcome = match result {
            Ok(ack) => ack.outcome.as_str(),
            Err(e) => error_label(e.kind()),
        };
        self.webhooks.with_label_values(&[outcome]).inc();
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

fn error_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "invalid",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Forbidden => "forbidden",
        ErrorKind::Conflict => "rejected",
        ErrorKind::Unauthorized => "unauthorized",
        ErrorKind::ExternalDependency => "gateway_error",
        ErrorKind::Transient => "unavailable",
        ErrorKind::Internal => "internal_error",
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_outcomes_are_counted() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_reconcile("ticket_purchase", &Err(TicketError::AmountMismatch { expected: 10, paid: 5 }));
        metrics.observe_webhook(&Err(TicketError::InvalidSignature));

        let rendered = metrics.render().unwrap();
        assert!(rendered.contains(r#"admit_reconciliations_total{kind="ticket_purchase",outcome="rejected"} 1"#));
        assert!(rendered.contains(r#"admit_webhooks_total{outcome="unauthorized"} 1"#));
    }
}
