//! # Aggregate Module
//!
//! Fleet-wide capacity aggregation over the Station → Container → Pack → Cell
//! hierarchy.
//!
//! This module handles:
//! - Validating and decoding telemetry records
//! - Routing records to shards by station id
//! - Per-cell smoothing and SOC estimation
//! - On-demand recalculation of capacity totals at every level

pub mod record;
pub mod shard;
pub mod tree;

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::Serialize;

/// Rated and currently stored capacity, in ampere hours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CapacityTotals {
    pub max_capacity: f64,
    pub current_capacity: f64,
}

impl CapacityTotals {
    #[must_use]
    pub fn new(max_capacity: f64, current_capacity: f64) -> Self {
        Self {
            max_capacity,
            current_capacity,
        }
    }

    /// Aggregate SOC as a fraction, or `None` when nothing is rated.
    #[must_use]
    pub fn state_of_charge(&self) -> Option<f64> {
        (self.max_capacity > 0.0).then(|| self.current_capacity / self.max_capacity)
    }
}

impl Add for CapacityTotals {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            max_capacity: self.max_capacity + other.max_capacity,
            current_capacity: self.current_capacity + other.current_capacity,
        }
    }
}

impl AddAssign for CapacityTotals {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sum for CapacityTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}
