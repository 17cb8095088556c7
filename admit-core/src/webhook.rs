use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    RejectedSignature,
    Malformed,
    Ignored,
    Processed,
    AlreadyProcessed,
    HandledFailure,
    RetryableFailure,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::RejectedSignature => "rejected_signature",
            WebhookOutcome::Malformed => "malformed",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::AlreadyProcessed => "already_processed",
            WebhookOutcome::HandledFailure => "handled_failure",
            WebhookOutcome::RetryableFailure => "retryable_failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rejected_signature" => Some(WebhookOutcome::RejectedSignature),
            "malformed" => Some(WebhookOutcome::Malformed),
            "ignored" => Some(WebhookOutcome::Ignored),
            "processed" => Some(WebhookOutcome::Processed),
            "already_processed" => Some(WebhookOutcome::AlreadyProcessed),
            "handled_failure" => Some(WebhookOutcome::HandledFailure),
            "retryable_failure" => Some(WebhookOutcome::RetryableFailure),
            _ => None,
        }
    }
}

/// Audit record of one inbound gateway webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLogEntry {
    pub id: Uuid,
    pub provider: String,
    pub event_type: Option<String>,
    pub reference: Option<String>,
    pub signature_valid: bool,
    pub outcome: WebhookOutcome,
    pub detail: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl WebhookLogEntry {
    pub fn new(provider: &str, signature_valid: bool, outcome: WebhookOutcome, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            event_type: None,
            reference: None,
            signature_valid,
            outcome,
            detail: None,
            received_at,
        }
    }
}
