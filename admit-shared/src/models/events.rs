use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification categories emitted by the ticketing core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TicketReserved,
    TicketPaid,
    TicketCheckedIn,
    ResaleBidPlaced,
    ResaleBidAccepted,
    ResaleBidRejected,
    ResaleOfferExpired,
    ResaleSold,
    ResalePurchased,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TicketReserved => "ticket_reserved",
            NotificationKind::TicketPaid => "ticket_paid",
            NotificationKind::TicketCheckedIn => "ticket_checked_in",
            NotificationKind::ResaleBidPlaced => "resale_bid_placed",
            NotificationKind::ResaleBidAccepted => "resale_bid_accepted",
            NotificationKind::ResaleBidRejected => "resale_bid_rejected",
            NotificationKind::ResaleOfferExpired => "resale_offer_expired",
            NotificationKind::ResaleSold => "resale_sold",
            NotificationKind::ResalePurchased => "resale_purchased",
        }
    }
}

/// Payload handed to the notification collaborator (Kafka topic, push fan-out).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}
