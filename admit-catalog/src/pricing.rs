use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EventListing, TicketCategory};
use crate::occurrence::Occurrence;

/// Time pressure saturates two weeks before the occurrence starts.
const TIME_PRESSURE_HORIZON_MINUTES: f64 = 14.0 * 24.0 * 60.0;
const MAX_DEMAND_RATIO: f64 = 1.6;
const DEMAND_WEIGHT: f64 = 0.75;
const TIME_WEIGHT: f64 = 0.25;

/// Organizer-configured demand pricing bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DynamicPricingPolicy {
    pub enabled: bool,
    /// How strongly the blended pressure moves the multiplier away from 1.0.
    pub sensitivity: f64,
    pub discount_floor_ratio: f64,
    pub surge_cap_ratio: f64,
    pub min_price_naira: Option<i64>,
    pub max_price_naira: Option<i64>,
    /// Overrides the category/event capacity as the demand denominator.
    pub expected_capacity: Option<i64>,
}

impl Default for DynamicPricingPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            sensitivity: 0.6,
            discount_floor_ratio: 0.8,
            surge_cap_ratio: 1.5,
            min_price_naira: None,
            max_price_naira: None,
            expected_capacity: None,
        }
    }
}

/// Explains how a quoted price was reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingInsight {
    pub applied: bool,
    pub base_price_naira: i64,
    pub reserved_count: i64,
    pub expected_capacity: Option<i64>,
    pub demand_ratio: f64,
    pub time_pressure: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub unit_price_naira: i64,
    pub insight: PricingInsight,
}

/// Live counts for the (event, category) the quote is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemandSnapshot {
    pub sold: i64,
    pub pending: i64,
}

impl DemandSnapshot {
    pub fn reserved(&self) -> i64 {
        self.sold + self.pending
    }
}

/// Demand- and time-adjusted pricing. Deterministic: all inputs are explicit.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicPricingEngine;

impl DynamicPricingEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn price(
        &self,
        event: &EventListing,
        category: Option<&TicketCategory>,
        occurrence: Option<&Occurrence>,
        demand: DemandSnapshot,
        now: DateTime<Utc>,
    ) -> PriceQuote {
        let base = event.static_price(category);
        let policy = &event.pricing;
        let expected_capacity = policy
            .expected_capacity
            .or_else(|| event.capacity_for(category))
            .filter(|c| *c > 0);

        if event.is_free || base <= 0 || !policy.enabled {
            return PriceQuote {
                unit_price_naira: base.max(0),
                insight: PricingInsight {
                    applied: false,
                    base_price_naira: base,
                    reserved_count: demand.reserved(),
                    expected_capacity,
                    demand_ratio: 0.0,
                    time_pressure: 0.0,
                    multiplier: 1.0,
                },
            };
        }

        let demand_ratio = Self::demand_ratio(demand.reserved(), expected_capacity);
        let time_pressure = occurrence
            .map(|o| Self::time_pressure(o.minutes_to_start(now)))
            .unwrap_or(0.0);
        let multiplier = Self::multiplier(policy, demand_ratio, time_pressure);

        let mut price = base as f64 * multiplier;
        if let Some(min) = policy.min_price_naira {
            price = price.max(min as f64);
        }
        if let Some(max) = policy.max_price_naira {
            price = price.min(max as f64);
        }

        PriceQuote {
            unit_price_naira: (price.round() as i64).max(0),
            insight: PricingInsight {
                applied: true,
                base_price_naira: base,
                reserved_count: demand.reserved(),
                expected_capacity,
                demand_ratio,
                time_pressure,
                multiplier,
            },
        }
    }

    pub fn demand_ratio(reserved: i64, expected_capacity: Option<i64>) -> f64 {
        match expected_capacity {
            Some(capacity) if capacity > 0 => {
                (reserved.max(0) as f64 / capacity as f64).clamp(0.0, MAX_DEMAND_RATIO)
            }
            _ => 0.0,
        }
    }

    pub fn time_pressure(minutes_to_start: i64) -> f64 {
        (1.0 - minutes_to_start as f64 / TIME_PRESSURE_HORIZON_MINUTES).clamp(0.0, 1.0)
    }

    fn multiplier(policy: &DynamicPricingPolicy, demand_ratio: f64, time_pressure: f64) -> f64 {
        let blended = DEMAND_WEIGHT * demand_ratio + TIME_WEIGHT * time_pressure;
        let raw = 1.0 + (blended - 0.5) * policy.sensitivity;
        let floor = policy.discount_floor_ratio.min(policy.surge_cap_ratio);
        let cap = policy.surge_cap_ratio.max(policy.discount_floor_ratio);
        raw.clamp(floor, cap)
    }
}
