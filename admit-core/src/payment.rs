use admit_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a successful payment should fulfil.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentKind {
    TicketPurchase {
        ticket_id: Uuid,
    },
    TicketResalePurchase {
        source_ticket_id: Uuid,
        accepted_bid_id: Option<Uuid>,
    },
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::TicketPurchase { .. } => "ticket_purchase",
            PaymentKind::TicketResalePurchase { .. } => "ticket_resale_purchase",
        }
    }

    /// Short tag embedded in gateway references.
    pub fn reference_tag(&self) -> &'static str {
        match self {
            PaymentKind::TicketPurchase { .. } => "pur",
            PaymentKind::TicketResalePurchase { .. } => "rsl",
        }
    }

    /// The ticket this attempt was opened against.
    pub fn ticket_id(&self) -> Uuid {
        match self {
            PaymentKind::TicketPurchase { ticket_id } => *ticket_id,
            PaymentKind::TicketResalePurchase { source_ticket_id, .. } => *source_ticket_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Initialized,
    Success,
    Failed,
    Abandoned,
    Expired,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Initialized => "initialized",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Abandoned => "abandoned",
            AttemptStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initialized" => Some(AttemptStatus::Initialized),
            "success" => Some(AttemptStatus::Success),
            "failed" => Some(AttemptStatus::Failed),
            "abandoned" => Some(AttemptStatus::Abandoned),
            "expired" => Some(AttemptStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Pending,
    Done,
    Failed,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "pending",
            FulfillmentStatus::Done => "done",
            FulfillmentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(FulfillmentStatus::Pending),
            "done" => Some(FulfillmentStatus::Done),
            "failed" => Some(FulfillmentStatus::Failed),
            _ => None,
        }
    }
}

/// Ledger row for one checkout intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub reference: String,
    pub provider: String,
    pub kind: PaymentKind,
    pub status: AttemptStatus,
    pub buyer_user_id: String,
    pub buyer_email: Option<Masked<String>>,
    pub event_id: Uuid,
    pub amount_minor_units: i64,
    pub currency: String,
    pub authorization_url: Option<String>,
    pub access_code: Option<String>,
    pub initialize_payload: Option<serde_json::Value>,
    pub verify_payload: Option<serde_json::Value>,
    pub fulfillment_status: FulfillmentStatus,
    pub fulfillment_ticket_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn is_fulfilled(&self) -> bool {
        self.fulfillment_status == FulfillmentStatus::Done
    }
}

/// Checkout handle returned by the gateway's initialize call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayCheckout {
    pub authorization_url: String,
    pub access_code: String,
    pub raw: serde_json::Value,
}

/// Authoritative transaction state, from a webhook body or an active verify call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayVerification {
    pub reference: String,
    pub status: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub raw: serde_json::Value,
}

impl GatewayVerification {
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }

    pub fn is_abandoned(&self) -> bool {
        self.status.eq_ignore_ascii_case("abandoned")
    }
}
