use admit_catalog::CapacityError;
use admit_core::{GatewayError, StoreError};
use chrono::{DateTime, Utc};

/// Coarse classification used by the HTTP layer and the webhook handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    Unauthorized,
    ExternalDependency,
    Transient,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Only the ticket owner can do this")]
    NotOwner,

    #[error("Only the event organizer can do this")]
    NotOrganizer,

    #[error("Ticket is not eligible: {0}")]
    TicketNotEligible(String),

    #[error("Event is not published")]
    EventNotPublished,

    #[error("Event has no upcoming occurrence")]
    NoUpcomingOccurrence,

    #[error("Insufficient capacity: requested {requested}, remaining {remaining}")]
    CapacityExceeded { requested: i64, remaining: i64 },

    #[error("Could not allocate a unique ticket code after {0} attempts")]
    AllocationExhausted(u32),

    #[error("Resale is not enabled for this event")]
    ResaleDisabled,

    #[error("Asking price {price} exceeds the resale cap of {cap}")]
    PriceExceedsCap { price: i64, cap: i64 },

    #[error("This listing only sells through accepted bids")]
    BiddingRequired,

    #[error("You already own this ticket")]
    AlreadyOwnThisTicket,

    #[error("The accepted offer window has expired")]
    OfferWindowExpired,

    #[error("Check-in is open from {opens_at} to {closes_at}")]
    CheckInWindowClosed {
        opens_at: DateTime<Utc>,
        closes_at: DateTime<Utc>,
    },

    #[error("Payment not completed: {0}")]
    PaymentNotCompleted(String),

    #[error("Paid amount {paid} is below the expected {expected} (minor units)")]
    AmountMismatch { expected: i64, paid: i64 },

    #[error("Paid currency {paid} does not match the expected {expected}")]
    CurrencyMismatch { expected: String, paid: String },

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Ticket was modified concurrently, refresh and retry")]
    ConcurrentUpdate,

    /// A paid transfer lost its write to a concurrent change; redelivery settles it.
    #[error("Ticket transfer raced a concurrent update")]
    TransferContended,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CapacityError> for TicketError {
    fn from(err: CapacityError) -> Self {
        match err {
            CapacityError::Exceeded { requested, remaining } => {
                TicketError::CapacityExceeded { requested, remaining }
            }
        }
    }
}

impl TicketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TicketError::Validation(_) | TicketError::PriceExceedsCap { .. } => ErrorKind::Validation,
            TicketError::NotFound(_) => ErrorKind::NotFound,
            TicketError::NotOwner | TicketError::NotOrganizer => ErrorKind::Forbidden,
            TicketError::InvalidSignature => ErrorKind::Unauthorized,
            TicketError::TicketNotEligible(_)
            | TicketError::EventNotPublished
            | TicketError::NoUpcomingOccurrence
            | TicketError::CapacityExceeded { .. }
            | TicketError::ResaleDisabled
            | TicketError::BiddingRequired
            | TicketError::AlreadyOwnThisTicket
            | TicketError::OfferWindowExpired
            | TicketError::CheckInWindowClosed { .. }
            | TicketError::PaymentNotCompleted(_)
            | TicketError::AmountMismatch { .. }
            | TicketError::CurrencyMismatch { .. }
            | TicketError::ConcurrentUpdate => ErrorKind::Conflict,
            TicketError::Gateway(_) => ErrorKind::ExternalDependency,
            TicketError::TransferContended => ErrorKind::Transient,
            TicketError::Store(e) if e.is_transient() => ErrorKind::Transient,
            TicketError::AllocationExhausted(_) | TicketError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Whether redelivering the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::ExternalDependency)
    }
}

pub type TicketResult<T> = Result<T, TicketError>;
