use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inventory::CapacityLimits;
use crate::pricing::DynamicPricingPolicy;

/// Publication state of an event, owned by the events collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Published => "published",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(EventStatus::Draft),
            "published" => Some(EventStatus::Published),
            "cancelled" => Some(EventStatus::Cancelled),
            _ => None,
        }
    }
}

/// A priced admission tier ("Regular", "VIP", ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketCategory {
    pub name: String,
    pub price_naira: i64,
    pub capacity: Option<i64>,
}

/// Resale rules set by the organizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResalePolicy {
    pub enabled: bool,
    pub max_markup_percent: f64,
    pub bid_window_hours: i64,
}

impl Default for ResalePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_markup_percent: 20.0,
            bid_window_hours: 24,
        }
    }
}

impl ResalePolicy {
    /// Highest asking price allowed for `quantity` seats bought at `unit_price`.
    pub fn price_cap(&self, unit_price: i64, quantity: i64) -> i64 {
        let base = unit_price.saturating_mul(quantity) as f64;
        let markup = self.max_markup_percent.max(0.0);
        (base * (1.0 + markup / 100.0)).floor() as i64
    }
}

/// The slice of an event this core needs; the event CRUD lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventListing {
    pub id: Uuid,
    pub organizer_user_id: String,
    pub title: String,
    pub status: EventStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_free: bool,
    pub base_price_naira: i64,
    pub capacity: Option<i64>,
    #[serde(default)]
    pub categories: Vec<TicketCategory>,
    pub currency: String,
    #[serde(default)]
    pub pricing: DynamicPricingPolicy,
    #[serde(default)]
    pub resale: ResalePolicy,
}

impl EventListing {
    pub fn is_published(&self) -> bool {
        self.status == EventStatus::Published
    }

    pub fn category(&self, name: &str) -> Option<&TicketCategory> {
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Static (pre-dynamic) unit price for a category, or the event base price.
    pub fn static_price(&self, category: Option<&TicketCategory>) -> i64 {
        if self.is_free {
            return 0;
        }
        category
            .map(|c| c.price_naira)
            .unwrap_or(self.base_price_naira)
    }

    /// Seat limit for the (event, category) pair. `None` means unlimited.
    pub fn capacity_for(&self, category: Option<&TicketCategory>) -> Option<i64> {
        category.and_then(|c| c.capacity).or(self.capacity)
    }

    /// Pools a reservation in `category` must fit in.
    pub fn capacity_limits(&self, category: Option<&TicketCategory>) -> CapacityLimits {
        let own = category.filter(|c| c.capacity.is_some());
        CapacityLimits {
            category: own.map(|c| c.name.clone()),
            category_capacity: own.and_then(|c| c.capacity),
            event_capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_cap_applies_markup() {
        let policy = ResalePolicy {
            enabled: true,
            max_markup_percent: 10.0,
            bid_window_hours: 12,
        };
        assert_eq!(policy.price_cap(5000, 1), 5500);
        assert_eq!(policy.price_cap(5000, 2), 11000);
    }

    #[test]
    fn test_category_capacity_falls_back_to_event() {
        let event: EventListing = serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "organizer_user_id": "org-1",
            "title": "Launch Night",
            "status": "published",
            "starts_at": "2030-01-01T18:00:00Z",
            "ends_at": "2030-01-01T23:00:00Z",
            "is_free": false,
            "base_price_naira": 1000,
            "capacity": 50,
            "categories": [
                { "name": "VIP", "price_naira": 5000, "capacity": 5 },
                { "name": "Regular", "price_naira": 1000, "capacity": null }
            ],
            "currency": "NGN"
        }))
        .expect("event should deserialize");

        let vip = event.category("vip");
        assert_eq!(event.capacity_for(vip), Some(5));
        assert_eq!(event.capacity_for(event.category("Regular")), Some(50));
        assert_eq!(event.static_price(vip), 5000);
        assert_eq!(event.capacity_limits(vip).scopes(), vec![(Some("VIP"), Some(5)), (None, Some(50))]);
        assert_eq!(event.capacity_limits(event.category("Regular")).scopes(), vec![(None, Some(50))]);
        assert!(event.resale.enabled);
    }
}
