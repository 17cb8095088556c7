use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventListing;

/// One concrete time window of a (possibly recurring) event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Occurrence {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Occurrence {
    pub fn minutes_to_start(&self, now: DateTime<Utc>) -> i64 {
        (self.starts_at - now).num_minutes()
    }

    /// Admission window widened by the given grace periods.
    pub fn admission_window(&self, opens_before: Duration, closes_after: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.starts_at - opens_before, self.ends_at + closes_after)
    }
}

/// Resolves the next relevant occurrence of an event. Must be pure.
pub trait OccurrenceResolver: Send + Sync {
    fn resolve(&self, event: &EventListing, reference_time: DateTime<Utc>) -> Option<Occurrence>;
}

/// Resolver for single-window events: the event's own schedule, until it ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduledOccurrenceResolver;

impl OccurrenceResolver for ScheduledOccurrenceResolver {
    fn resolve(&self, event: &EventListing, reference_time: DateTime<Utc>) -> Option<Occurrence> {
        if event.ends_at <= reference_time || event.ends_at < event.starts_at {
            return None;
        }
        Some(Occurrence {
            starts_at: event.starts_at,
            ends_at: event.ends_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventStatus, ResalePolicy};
    use crate::pricing::DynamicPricingPolicy;
    use uuid::Uuid;

    fn event(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> EventListing {
        EventListing {
            id: Uuid::new_v4(),
            organizer_user_id: "org".to_string(),
            title: "Gig".to_string(),
            status: EventStatus::Published,
            starts_at,
            ends_at,
            is_free: false,
            base_price_naira: 1000,
            capacity: None,
            categories: vec![],
            currency: "NGN".to_string(),
            pricing: DynamicPricingPolicy::default(),
            resale: ResalePolicy::default(),
        }
    }

    #[test]
    fn test_resolves_until_event_ends() {
        let now = Utc::now();
        let ev = event(now + Duration::hours(1), now + Duration::hours(3));
        let resolver = ScheduledOccurrenceResolver;

        assert!(resolver.resolve(&ev, now).is_some());
        // In progress still resolves.
        assert!(resolver.resolve(&ev, now + Duration::hours(2)).is_some());
        assert!(resolver.resolve(&ev, now + Duration::hours(4)).is_none());
    }
}
