//! # SOC Estimation
//!
//! Maps cell voltage (and current while charging) to a state of charge in
//! percent using piecewise-linear Li-ion curves.
//!
//! ## Discharge curve
//!
//! ```text
//!  V |
//!    | .
//!    |   .
//!    |     .   .    .    .    .    .    .   .
//!    |                                         .
//!    |                                           .
//!    |______________________________________________
//!    100%  90%                            10%    0%
//!     Vmax  VmidHigh                  VmidLow    Vmin
//! ```
//!
//! The flat plateau between `VmidHigh` and `VmidLow` carries 80% of the
//! capacity; the knees at either end carry 10% each.
//!
//! ## Charge curve
//!
//! While the charger holds constant current, voltage climbs through three
//! bands (0-5%, 5-15%, 15-80%). Once the cell reaches the upper knee and the
//! current starts to taper, voltage is pinned and the remaining 80-100% is read
//! from the current instead.

use serde::Deserialize;

use super::filter::{FilterParams, ScalarFilter};
use crate::error::{BmsError, Result};

/// Default discharge thresholds for the supported Li-ion chemistry (volts).
pub const DISCHARGE_MAX_VOLTAGE: f64 = 4.25;
pub const DISCHARGE_MID_HIGH_VOLTAGE: f64 = 3.7;
pub const DISCHARGE_MID_LOW_VOLTAGE: f64 = 3.0;
pub const DISCHARGE_MIN_VOLTAGE: f64 = 2.5;

/// Default charge thresholds for the supported Li-ion chemistry (volts).
pub const CHARGE_MAX_VOLTAGE: f64 = 4.2;
pub const CHARGE_MID_HIGH_VOLTAGE: f64 = 3.8;
pub const CHARGE_MID_LOW_VOLTAGE: f64 = 3.5;
pub const CHARGE_MIN_VOLTAGE: f64 = 2.5;

/// Default constant-charge current (1.0 C).
pub const MAX_CHARGING_CURRENT: f64 = 1.0;

/// Four strictly decreasing voltage knees of a SOC curve.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawThresholds")]
pub struct VoltageThresholds {
    max: f64,
    mid_high: f64,
    mid_low: f64,
    min: f64,
}

impl VoltageThresholds {
    /// Validates `max > mid_high > mid_low > min`, all finite.
    ///
    /// # Errors
    ///
    /// Returns [`BmsError::InvalidThresholds`] for non-finite values or any
    /// pair that is equal or inverted (both would divide by zero or flip a band).
    pub fn new(max: f64, mid_high: f64, mid_low: f64, min: f64) -> Result<Self> {
        for (name, value) in [
            ("max_voltage", max),
            ("mid_high_voltage", mid_high),
            ("mid_low_voltage", mid_low),
            ("min_voltage", min),
        ] {
            if !value.is_finite() {
                return Err(BmsError::InvalidThresholds(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }

        for (upper_name, upper, lower_name, lower) in [
            ("max_voltage", max, "mid_high_voltage", mid_high),
            ("mid_high_voltage", mid_high, "mid_low_voltage", mid_low),
            ("mid_low_voltage", mid_low, "min_voltage", min),
        ] {
            if upper <= lower {
                return Err(BmsError::InvalidThresholds(format!(
                    "{} ({}) must be greater than {} ({})",
                    upper_name, upper, lower_name, lower
                )));
            }
        }

        Ok(Self { max, mid_high, mid_low, min })
    }

    /// Default Li-ion discharge knees (4.25 / 3.7 / 3.0 / 2.5 V).
    #[must_use]
    pub fn discharge_default() -> Self {
        Self {
            max: DISCHARGE_MAX_VOLTAGE,
            mid_high: DISCHARGE_MID_HIGH_VOLTAGE,
            mid_low: DISCHARGE_MID_LOW_VOLTAGE,
            min: DISCHARGE_MIN_VOLTAGE,
        }
    }

    /// Default Li-ion charge knees (4.2 / 3.8 / 3.5 / 2.5 V).
    #[must_use]
    pub fn charge_default() -> Self {
        Self {
            max: CHARGE_MAX_VOLTAGE,
            mid_high: CHARGE_MID_HIGH_VOLTAGE,
            mid_low: CHARGE_MID_LOW_VOLTAGE,
            min: CHARGE_MIN_VOLTAGE,
        }
    }

    #[must_use]
    pub fn max(&self) -> f64 {
        self.max
    }

    #[must_use]
    pub fn mid_high(&self) -> f64 {
        self.mid_high
    }

    #[must_use]
    pub fn mid_low(&self) -> f64 {
        self.mid_low
    }

    #[must_use]
    pub fn min(&self) -> f64 {
        self.min
    }
}

#[derive(Debug, Deserialize)]
struct RawThresholds {
    max_voltage: f64,
    mid_high_voltage: f64,
    mid_low_voltage: f64,
    min_voltage: f64,
}

impl TryFrom<RawThresholds> for VoltageThresholds {
    type Error = BmsError;

    fn try_from(raw: RawThresholds) -> Result<Self> {
        Self::new(raw.max_voltage, raw.mid_high_voltage, raw.mid_low_voltage, raw.min_voltage)
    }
}

/// SOC estimator for idle and discharging cells.
#[derive(Debug, Clone)]
pub struct DischargeEstimator {
    thresholds: VoltageThresholds,
    /// Calibration of the optional voltage pre-filter.
    filter_params: Option<FilterParams>,
    /// Seeded from the first voltage passed to [`DischargeEstimator::soc`].
    voltage_filter: Option<ScalarFilter>,
}

impl Default for DischargeEstimator {
    fn default() -> Self {
        Self::new(VoltageThresholds::discharge_default())
    }
}

impl DischargeEstimator {
    #[must_use]
    pub fn new(thresholds: VoltageThresholds) -> Self {
        Self {
            thresholds,
            filter_params: None,
            voltage_filter: None,
        }
    }

    /// Enables a voltage pre-filter for [`DischargeEstimator::soc`]. The
    /// filter is seeded from the first voltage it sees.
    #[must_use]
    pub fn with_filter(mut self, params: FilterParams) -> Self {
        self.filter_params = Some(params);
        self.voltage_filter = None;
        self
    }

    #[must_use]
    pub fn thresholds(&self) -> &VoltageThresholds {
        &self.thresholds
    }

    /// Pre-filters `voltage` (when a filter is enabled) and estimates SOC.
    pub fn soc(&mut self, voltage: f64) -> f64 {
        let voltage = match &self.filter_params {
            Some(params) => params.smooth(&mut self.voltage_filter, voltage),
            None => voltage,
        };
        self.estimate(voltage)
    }

    /// SOC in percent for an already-smoothed voltage. NaN reads as empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use fleet_bms::estimation::soc::DischargeEstimator;
    ///
    /// let estimator = DischargeEstimator::default();
    /// // 100 - (4.25 - 3.8) / (4.25 - 3.7) * 10
    /// assert!((estimator.estimate(3.8) - 91.818_181_818_181_82).abs() < 1e-9);
    /// ```
    #[must_use]
    pub fn estimate(&self, voltage: f64) -> f64 {
        let t = &self.thresholds;

        if voltage.is_nan() {
            0.0
        } else if voltage >= t.max {
            100.0
        } else if voltage >= t.mid_high {
            100.0 - (t.max - voltage) / (t.max - t.mid_high) * 10.0
        } else if voltage >= t.mid_low {
            90.0 - (t.mid_high - voltage) / (t.mid_high - t.mid_low) * 80.0
        } else if voltage >= t.min {
            10.0 - (t.mid_low - voltage) / (t.mid_low - t.min) * 10.0
        } else {
            0.0
        }
    }
}

/// SOC estimator for charging cells (constant-current then taper).
#[derive(Debug, Clone)]
pub struct ChargeEstimator {
    thresholds: VoltageThresholds,
    max_charging_current: f64,
    /// Voltage and current pre-filter calibration, when enabled.
    filter_params: Option<(FilterParams, FilterParams)>,
    voltage_filter: Option<ScalarFilter>,
    current_filter: Option<ScalarFilter>,
}

impl Default for ChargeEstimator {
    fn default() -> Self {
        Self {
            thresholds: VoltageThresholds::charge_default(),
            max_charging_current: MAX_CHARGING_CURRENT,
            filter_params: None,
            voltage_filter: None,
            current_filter: None,
        }
    }
}

impl ChargeEstimator {
    /// # Errors
    ///
    /// Returns [`BmsError::InvalidThresholds`] unless `max_charging_current`
    /// is finite and positive; the taper formula divides by it.
    pub fn new(thresholds: VoltageThresholds, max_charging_current: f64) -> Result<Self> {
        if !max_charging_current.is_finite() || max_charging_current <= 0.0 {
            return Err(BmsError::InvalidThresholds(format!(
                "max_charging_current must be finite and > 0, got {}",
                max_charging_current
            )));
        }

        Ok(Self {
            thresholds,
            max_charging_current,
            ..Self::default()
        })
    }

    /// Enables independent voltage and current pre-filters, each seeded from
    /// the first value it sees.
    #[must_use]
    pub fn with_filters(mut self, voltage: FilterParams, current: FilterParams) -> Self {
        self.filter_params = Some((voltage, current));
        self.voltage_filter = None;
        self.current_filter = None;
        self
    }

    #[must_use]
    pub fn thresholds(&self) -> &VoltageThresholds {
        &self.thresholds
    }

    #[must_use]
    pub fn max_charging_current(&self) -> f64 {
        self.max_charging_current
    }

    /// Pre-filters both channels (when filters are enabled) and estimates SOC.
    pub fn soc(&mut self, voltage: f64, current: f64) -> f64 {
        let (voltage, current) = match &self.filter_params {
            Some((voltage_params, current_params)) => (
                voltage_params.smooth(&mut self.voltage_filter, voltage),
                current_params.smooth(&mut self.current_filter, current),
            ),
            None => (voltage, current),
        };
        self.estimate(voltage, current)
    }

    /// Whether the reading belongs to the taper (saturation) stage.
    ///
    /// Current below the constant-charge level only means tapering once the
    /// cell sits at or above the upper knee; below it the charger is still
    /// ramping or current-limited and voltage remains the better indicator.
    #[must_use]
    pub fn is_tapering(&self, voltage: f64, current: f64) -> bool {
        current < self.max_charging_current && voltage >= self.thresholds.mid_high
    }

    /// SOC in percent for already-smoothed voltage and current.
    ///
    /// A NaN voltage reads as empty; a NaN current never counts as tapering.
    ///
    /// # Examples
    ///
    /// ```
    /// use fleet_bms::estimation::soc::ChargeEstimator;
    ///
    /// let estimator = ChargeEstimator::default();
    /// assert!((estimator.estimate(3.0, 0.5) - 2.5).abs() < 1e-9);
    /// assert!((estimator.estimate(4.0, 0.8) - 84.0).abs() < 1e-9);
    /// ```
    #[must_use]
    pub fn estimate(&self, voltage: f64, current: f64) -> f64 {
        if voltage.is_nan() {
            return 0.0;
        }

        if self.is_tapering(voltage, current) {
            let i_max = self.max_charging_current;
            let soc = 80.0 + (i_max - current) / i_max * 20.0;
            return soc.clamp(0.0, 100.0);
        }

        self.constant_current_soc(voltage)
    }

    fn constant_current_soc(&self, voltage: f64) -> f64 {
        let t = &self.thresholds;

        if voltage < t.min {
            0.0
        } else if voltage < t.mid_low {
            (voltage - t.min) / (t.mid_low - t.min) * 5.0
        } else if voltage < t.mid_high {
            5.0 + (voltage - t.mid_low) / (t.mid_high - t.mid_low) * 10.0
        } else if voltage < t.max {
            80.0 - (t.max - voltage) / (t.max - t.mid_high) * 65.0
        } else {
            80.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn test_discharge_reference_points() {
        let estimator = DischargeEstimator::default();

        for (voltage, expected) in [
            (4.5, 100.0),
            (4.25, 100.0),
            // 100 - 0.45 / 0.55 * 10
            (3.8, 91.818_181_818_181_82),
            (3.7, 90.0),
            (3.35, 50.0),
            (3.0, 10.0),
            (2.75, 5.0),
            (2.5, 0.0),
            (2.0, 0.0),
        ] {
            let soc = estimator.estimate(voltage);
            assert!(
                (soc - expected).abs() < 1e-6,
                "voltage {} -> expected {}, got {}",
                voltage,
                expected,
                soc
            );
        }
    }

    #[test]
    fn test_nan_voltage_reads_empty() {
        assert_eq!(DischargeEstimator::default().estimate(f64::NAN), 0.0);

        let charge = ChargeEstimator::default();
        assert_eq!(charge.estimate(f64::NAN, 0.5), 0.0);
        assert_eq!(charge.estimate(f64::NAN, f64::NAN), 0.0);
        assert!(!charge.is_tapering(4.2, f64::NAN));
        assert_eq!(charge.estimate(4.2, f64::NAN), 80.0);
    }

    #[test]
    fn test_discharge_monotonic_over_range() {
        let estimator = DischargeEstimator::default();
        let mut previous = estimator.estimate(2.0);

        let mut voltage = 2.0;
        while voltage <= 4.5 {
            let soc = estimator.estimate(voltage);
            assert!(soc + TOLERANCE >= previous, "SOC dropped at {} V", voltage);
            previous = soc;
            voltage += 0.001;
        }
    }

    #[test]
    fn test_discharge_filter_smooths_input() {
        let mut estimator = DischargeEstimator::default().with_filter(FilterParams::default());

        // Seeded from the first reading, so it passes through unchanged
        assert!((estimator.soc(3.0) - 10.0).abs() < TOLERANCE);

        // A jump to 3.7 V is pulled back toward 3.0 V
        let filtered = estimator.soc(3.7);
        assert!(filtered > 10.0);
        assert!(filtered < 90.0);
    }

    #[test]
    fn test_unfiltered_discharge_soc_matches_estimate() {
        let mut estimator = DischargeEstimator::default();
        assert_eq!(estimator.soc(3.35), estimator.estimate(3.35));
        assert_eq!(estimator.soc(3.7), 90.0);
    }

    #[test]
    fn test_charge_constant_current_bands() {
        let estimator = ChargeEstimator::default();

        for (voltage, current, expected) in [
            (2.0, 1.0, 0.0),
            (3.0, 0.5, 2.5),
            (3.5, 1.0, 5.0),
            (3.65, 1.0, 10.0),
            (3.8, 1.0, 15.0),
            (4.0, 1.0, 47.5),
            (4.2, 1.0, 80.0),
            (4.3, 1.2, 80.0),
        ] {
            let soc = estimator.estimate(voltage, current);
            assert!(
                (soc - expected).abs() < 1e-6,
                "({} V, {} A) -> expected {}, got {}",
                voltage,
                current,
                expected,
                soc
            );
        }
    }

    #[test]
    fn test_charge_taper_stage() {
        let estimator = ChargeEstimator::default();

        assert!((estimator.estimate(4.0, 0.8) - 84.0).abs() < TOLERANCE);
        assert!((estimator.estimate(4.2, 0.5) - 90.0).abs() < TOLERANCE);
        assert!((estimator.estimate(4.2, 0.0) - 100.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_charge_taper_clamped() {
        let estimator = ChargeEstimator::default();
        // Reverse current at the top of charge cannot exceed 100%
        assert_eq!(estimator.estimate(4.2, -0.5), 100.0);
    }

    #[test]
    fn test_charge_low_current_below_knee_uses_voltage() {
        let estimator = ChargeEstimator::default();
        assert!(!estimator.is_tapering(3.7, 0.2));
        assert!(estimator.is_tapering(3.9, 0.2));
        assert!(!estimator.is_tapering(3.9, 1.0));
    }

    #[test]
    fn test_charge_constant_current_monotonic() {
        let estimator = ChargeEstimator::default();
        let mut previous = estimator.estimate(2.0, 1.0);

        let mut voltage = 2.0;
        while voltage <= 4.4 {
            let soc = estimator.estimate(voltage, 1.0);
            assert!(soc + TOLERANCE >= previous, "SOC dropped at {} V", voltage);
            previous = soc;
            voltage += 0.001;
        }
    }

    #[test]
    fn test_charge_with_filters() {
        let params = FilterParams::default();
        let mut estimator = ChargeEstimator::default().with_filters(params, params);

        // Both filters are seeded by the first call, which matches the pure estimate
        assert!((estimator.soc(4.0, 0.8) - 84.0).abs() < TOLERANCE);

        // A current spike is damped, so SOC stays inside the taper stage
        let next = estimator.soc(4.0, 0.2);
        assert!(next > 84.0 && next < 96.0);
    }

    #[test]
    fn test_thresholds_reject_collapsed_pair() {
        assert!(VoltageThresholds::new(4.2, 4.2, 3.5, 2.5).is_err());
        assert!(VoltageThresholds::new(4.2, 3.8, 3.8, 2.5).is_err());
        assert!(VoltageThresholds::new(4.2, 3.8, 3.5, 3.5).is_err());
    }

    #[test]
    fn test_thresholds_reject_inverted_and_non_finite() {
        assert!(VoltageThresholds::new(2.5, 3.0, 3.7, 4.25).is_err());
        assert!(VoltageThresholds::new(f64::NAN, 3.7, 3.0, 2.5).is_err());
        assert!(VoltageThresholds::new(4.25, 3.7, 3.0, 2.5).is_ok());
    }

    #[test]
    fn test_charge_rejects_non_positive_current() {
        let thresholds = VoltageThresholds::charge_default();
        assert!(ChargeEstimator::new(thresholds, 0.0).is_err());
        assert!(ChargeEstimator::new(thresholds, -1.0).is_err());
        assert!(ChargeEstimator::new(thresholds, f64::INFINITY).is_err());
        assert!(ChargeEstimator::new(thresholds, 2.0).is_ok());
    }

    #[test]
    fn test_thresholds_deserialize() {
        let toml_content = r#"
max_voltage = 4.1
mid_high_voltage = 3.6
mid_low_voltage = 3.1
min_voltage = 2.8
"#;
        let thresholds: VoltageThresholds = toml::from_str(toml_content).unwrap();
        assert_eq!(thresholds.max(), 4.1);
        assert_eq!(thresholds.min(), 2.8);

        let inverted = r#"
max_voltage = 3.0
mid_high_voltage = 3.6
mid_low_voltage = 3.1
min_voltage = 2.8
"#;
        let result: std::result::Result<VoltageThresholds, _> = toml::from_str(inverted);
        assert!(result.is_err());
    }
}
