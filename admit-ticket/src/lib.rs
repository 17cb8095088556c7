pub mod error;
pub mod context;
pub mod code;
pub mod lifecycle;
pub mod checkout;
pub mod resale;
pub mod reconciler;
pub mod webhook;
pub mod sweeper;
pub mod service;

pub use checkout::{CheckoutRequest, CheckoutService};
pub use code::TicketCodeAllocator;
pub use context::TicketingContext;
pub use error::{ErrorKind, TicketError, TicketResult};
pub use lifecycle::{CheckInResult, PriceView, ReserveRequest, TicketLifecycle};
pub use reconciler::{PaymentReconciler, ReconcileOutcome};
pub use resale::{ListingRequest, PurchaseSource, ResaleCheckoutOutcome, ResaleMarketplace};
pub use service::TicketingService;
pub use sweeper::{ResaleExpirySweeper, SweepReport};
pub use webhook::{GatewayEventHandler, WebhookAck};
