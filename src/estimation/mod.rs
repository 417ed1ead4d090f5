//! # Estimation Module
//!
//! Signal processing that turns raw cell readings into SOC.
//!
//! This module handles:
//! - Smoothing noisy voltage, current and temperature samples
//! - Mapping smoothed voltage/current onto discharge and charge curves
//! - Bundling the calibration shared by every cell in the fleet

pub mod filter;
pub mod soc;

use filter::FilterParams;
use soc::{ChargeEstimator, DischargeEstimator};

/// Calibration shared by every cell: per-channel filter constants plus the
/// discharge and charge curves.
///
/// Estimators held here never carry attached filters; cells filter their own
/// channels before estimating, so the model stays immutable and shareable.
#[derive(Debug, Clone, Default)]
pub struct CellModel {
    pub voltage_filter: FilterParams,
    pub current_filter: FilterParams,
    pub temperature_filter: FilterParams,
    pub discharge: DischargeEstimator,
    pub charge: ChargeEstimator,
}

impl CellModel {
    #[must_use]
    pub fn new(
        voltage_filter: FilterParams,
        current_filter: FilterParams,
        temperature_filter: FilterParams,
        discharge: DischargeEstimator,
        charge: ChargeEstimator,
    ) -> Self {
        Self {
            voltage_filter,
            current_filter,
            temperature_filter,
            discharge,
            charge,
        }
    }
}
