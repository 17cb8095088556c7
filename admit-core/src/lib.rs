pub mod models;
pub mod payment;
pub mod gateway;
pub mod signature;
pub mod webhook;
pub mod repository;
pub mod notify;
pub mod rules;
pub mod memory;

pub use gateway::{GatewayError, InitializeTransaction, PaymentGateway, SandboxGateway};
pub use models::{BidStatus, ResaleBid, ResaleListing, ResaleStatus, Ticket, TicketStatus};
pub use notify::{NotificationSink, TracingNotificationSink};
pub use payment::{
    AttemptStatus, FulfillmentStatus, GatewayCheckout, GatewayVerification, PaymentAttempt, PaymentKind,
};
pub use repository::{
    BidEffect, EventCatalog, PaymentAttemptRepository, ResaleTransfer, ResaleUpdate, StoreError, StoreResult,
    TicketRepository, WebhookLogRepository,
};
pub use rules::TicketingRules;
pub use webhook::{WebhookLogEntry, WebhookOutcome};
