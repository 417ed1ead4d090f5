//! # Simulation Module
//!
//! Synthetic battery telemetry for tests and the demo binary.
//!
//! This module handles:
//! - Inverting the SOC curves into voltage/current readings
//! - Cycling simulated cells between charge and discharge
//! - Adding seeded sensor noise to every channel

pub mod curve;
pub mod sensor;

pub use curve::SocCurve;
pub use sensor::{SensorNoise, SimulatedCell, SimulatedFleet};
