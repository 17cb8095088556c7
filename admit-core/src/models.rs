use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Ticket
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Paid,
    Cancelled,
    Used,
    Expired,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Paid => "paid",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Used => "used",
            TicketStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TicketStatus::Pending),
            "paid" => Some(TicketStatus::Paid),
            "cancelled" => Some(TicketStatus::Cancelled),
            "used" => Some(TicketStatus::Used),
            "expired" => Some(TicketStatus::Expired),
            _ => None,
        }
    }

    /// Holds a seat regardless of reservation age.
    pub fn is_sold(&self) -> bool {
        matches!(self, TicketStatus::Paid | TicketStatus::Used)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResaleStatus {
    #[default]
    None,
    Listed,
    OfferAccepted,
}

impl ResaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResaleStatus::None => "none",
            ResaleStatus::Listed => "listed",
            ResaleStatus::OfferAccepted => "offer_accepted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(ResaleStatus::None),
            "listed" => Some(ResaleStatus::Listed),
            "offer_accepted" => Some(ResaleStatus::OfferAccepted),
            _ => None,
        }
    }
}

/// Resale sub-state of a paid ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResaleListing {
    pub status: ResaleStatus,
    pub price_naira: Option<i64>,
    pub quantity: Option<i32>,
    pub allow_bids: bool,
    pub listed_at: Option<DateTime<Utc>>,
    pub accepted_bid_id: Option<Uuid>,
    pub accepted_bid_expires_at: Option<DateTime<Utc>>,
    pub buyer_user_id: Option<String>,
}

impl ResaleListing {
    pub fn listed(price_naira: i64, quantity: i32, allow_bids: bool, now: DateTime<Utc>) -> Self {
        Self {
            status: ResaleStatus::Listed,
            price_naira: Some(price_naira),
            quantity: Some(quantity),
            allow_bids,
            listed_at: Some(now),
            ..Self::default()
        }
    }

    /// Drops the accepted offer, keeping the listing terms.
    pub fn reopen(&mut self) {
        self.status = ResaleStatus::Listed;
        self.accepted_bid_id = None;
        self.accepted_bid_expires_at = None;
        self.buyer_user_id = None;
    }

    pub fn offer_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ResaleStatus::OfferAccepted
            && self.accepted_bid_expires_at.map_or(true, |at| at <= now)
    }
}

/// One sellable admission unit, possibly covering several seats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub category: Option<String>,
    pub buyer_user_id: String,
    pub organizer_user_id: String,
    pub quantity: i32,
    pub unit_price_naira: i64,
    pub total_price_naira: i64,
    pub currency: String,
    pub status: TicketStatus,
    pub payment_provider: Option<String>,
    pub payment_reference: Option<String>,
    pub ticket_code: String,
    pub barcode_value: String,
    pub occurrence_starts_at: Option<DateTime<Utc>>,
    pub occurrence_ends_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub used_by_user_id: Option<String>,
    pub resold_from_ticket_id: Option<Uuid>,
    pub resale: ResaleListing,
    /// Bumped by every write; compare-and-swap token.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.buyer_user_id == user_id
    }

    pub fn amount_minor_units(&self) -> i64 {
        self.total_price_naira.saturating_mul(100)
    }

    /// Clears resale state, as required whenever the ticket leaves `paid`.
    pub fn clear_resale(&mut self) {
        self.resale = ResaleListing::default();
    }
}

// ============================================================================
// Resale bids
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Open,
    Accepted,
    Rejected,
    Expired,
    Paid,
    Withdrawn,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidStatus::Open => "open",
            BidStatus::Accepted => "accepted",
            BidStatus::Rejected => "rejected",
            BidStatus::Expired => "expired",
            BidStatus::Paid => "paid",
            BidStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(BidStatus::Open),
            "accepted" => Some(BidStatus::Accepted),
            "rejected" => Some(BidStatus::Rejected),
            "expired" => Some(BidStatus::Expired),
            "paid" => Some(BidStatus::Paid),
            "withdrawn" => Some(BidStatus::Withdrawn),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BidStatus::Open | BidStatus::Accepted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResaleBid {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub event_id: Uuid,
    pub seller_user_id: String,
    pub bidder_user_id: String,
    pub amount_naira: i64,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl ResaleBid {
    pub fn open(ticket: &Ticket, bidder_user_id: &str, amount_naira: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            event_id: ticket.event_id,
            seller_user_id: ticket.buyer_user_id.clone(),
            bidder_user_id: bidder_user_id.to_string(),
            amount_naira,
            status: BidStatus::Open,
            created_at: now,
            responded_at: None,
            expires_at: None,
            paid_at: None,
        }
    }
}
