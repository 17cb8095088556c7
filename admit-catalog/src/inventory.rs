use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seat accounting for one (event, category) pair at a point in time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub capacity: Option<i64>,
    /// Paid and used seats.
    pub sold: i64,
    /// Pending seats still inside the freshness window.
    pub pending_fresh: i64,
}

impl CapacitySnapshot {
    pub fn reserved(&self) -> i64 {
        self.sold + self.pending_fresh
    }

    /// Seats still available; `None` when the category is unlimited.
    pub fn remaining(&self) -> Option<i64> {
        self.capacity.map(|c| (c - self.reserved()).max(0))
    }

    pub fn check(&self, requested: i64) -> Result<(), CapacityError> {
        match self.remaining() {
            Some(remaining) if requested > remaining => Err(CapacityError::Exceeded {
                requested,
                remaining,
            }),
            _ => Ok(()),
        }
    }

    /// Fraction of capacity reserved, 0.0 for unlimited categories.
    pub fn utilization(&self) -> f64 {
        match self.capacity {
            Some(c) if c > 0 => self.reserved() as f64 / c as f64,
            _ => 0.0,
        }
    }
}

/// Every pool a reservation draws from: the category's own pool when it has one,
/// then the event total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLimits {
    /// Set only for a category with its own capacity.
    pub category: Option<String>,
    pub category_capacity: Option<i64>,
    pub event_capacity: Option<i64>,
}

impl CapacityLimits {
    /// `(category filter, capacity)` pairs, narrowest first.
    pub fn scopes(&self) -> Vec<(Option<&str>, Option<i64>)> {
        let mut scopes = Vec::with_capacity(2);
        if let Some(name) = self.category.as_deref() {
            scopes.push((Some(name), self.category_capacity));
        }
        scopes.push((None, self.event_capacity));
        scopes
    }
}

/// Seats left in the tightest pool, `None` when no pool is capped.
pub fn remaining_across(snapshots: &[CapacitySnapshot]) -> Option<i64> {
    snapshots.iter().filter_map(CapacitySnapshot::remaining).min()
}

/// Fails with the first pool that cannot take `requested` more seats.
pub fn check_across(snapshots: &[CapacitySnapshot], requested: i64) -> Result<(), CapacityError> {
    snapshots.iter().try_for_each(|s| s.check(requested))
}

/// Pending reservations created before this instant no longer hold capacity.
pub fn freshness_cutoff(now: DateTime<Utc>, freshness_minutes: i64) -> DateTime<Utc> {
    now - Duration::minutes(freshness_minutes.max(0))
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CapacityError {
    #[error("Insufficient capacity: requested {requested}, remaining {remaining}")]
    Exceeded { requested: i64, remaining: i64 },
}
