pub mod event;
pub mod occurrence;
pub mod pricing;
pub mod inventory;

pub use event::{EventListing, EventStatus, ResalePolicy, TicketCategory};
pub use occurrence::{Occurrence, OccurrenceResolver, ScheduledOccurrenceResolver};
pub use pricing::{DemandSnapshot, DynamicPricingEngine, DynamicPricingPolicy, PriceQuote, PricingInsight};
pub use inventory::{CapacityError, CapacityLimits, CapacitySnapshot};
