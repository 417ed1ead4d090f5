//! # Fleet BMS Library
//!
//! Battery state estimation and capacity aggregation for a fleet of
//! energy-storage stations.
//!
//! Raw cell telemetry is smoothed with scalar Kalman filters, mapped to a
//! state of charge through piecewise voltage curves, and rolled up through a
//! Station → Container → Pack → Cell tree held in a sharded, lock-per-shard
//! table.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod estimation;
pub mod simulation;

pub use aggregate::record::{OperatingState, TelemetryRecord};
pub use aggregate::shard::ShardTable;
pub use aggregate::CapacityTotals;
pub use config::Config;
pub use error::{BmsError, Result};
