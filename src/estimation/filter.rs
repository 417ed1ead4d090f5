//! # Scalar Noise Filter
//!
//! One-dimensional Kalman filter used to smooth a single noisy sensor channel
//! (cell voltage, current or temperature).
//!
//! ## Model
//!
//! The signal is modelled as a random walk: the prediction step keeps the
//! previous estimate and only grows its uncertainty by the process noise `q`.
//!
//! ```text
//! predict:  x⁻ = x̂          p⁻ = p + q
//! correct:  k  = p⁻ / (p⁻ + r)
//!           x̂  = x⁻ + k · (z − x⁻)
//!           p  = (1 − k) · p⁻
//! ```
//!
//! A small `q` relative to `r` gives heavy smoothing; a large `q` tracks the
//! raw signal closely.
//!
//! ## Usage
//!
//! ```
//! use fleet_bms::estimation::filter::ScalarFilter;
//!
//! let mut filter = ScalarFilter::new(3.7, 1.0, 0.01, 0.01)?;
//! let smoothed = filter.update(3.72);
//! assert!(smoothed > 3.7 && smoothed < 3.72);
//! # Ok::<(), fleet_bms::error::BmsError>(())
//! ```

use serde::Deserialize;
use tracing::warn;

use crate::error::{BmsError, Result};

/// Recursive linear estimator for one scalar signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarFilter {
    /// State estimate.
    x_hat: f64,
    /// Estimate error covariance.
    p: f64,
    /// Process noise covariance.
    q: f64,
    /// Measurement noise covariance.
    r: f64,
    /// Gain applied by the most recent update.
    k: f64,
}

impl ScalarFilter {
    /// Creates a filter seeded with an initial estimate.
    ///
    /// # Arguments
    ///
    /// * `initial_value` - Starting estimate (usually the first observation)
    /// * `initial_estimate_error` - Starting error covariance (>= 0)
    /// * `process_noise` - Process noise covariance `q` (>= 0)
    /// * `measurement_noise` - Measurement noise covariance `r` (> 0)
    ///
    /// # Errors
    ///
    /// Returns [`BmsError::InvalidFilter`] if any argument is non-finite or out
    /// of range. `r > 0` keeps the gain denominator away from zero.
    pub fn new(
        initial_value: f64,
        initial_estimate_error: f64,
        process_noise: f64,
        measurement_noise: f64,
    ) -> Result<Self> {
        if !initial_value.is_finite() {
            return Err(BmsError::InvalidFilter(format!(
                "initial value must be finite, got {}",
                initial_value
            )));
        }
        FilterParams::new(initial_estimate_error, process_noise, measurement_noise)
            .map(|params| params.seed(initial_value))
    }

    /// Feeds one measurement through the filter and returns the new estimate.
    pub fn update(&mut self, measurement: f64) -> f64 {
        // Predict
        let x_minus = self.x_hat;
        let p_minus = self.p + self.q;

        // Correct
        self.k = p_minus / (p_minus + self.r);
        self.x_hat = x_minus + self.k * (measurement - x_minus);
        self.p = (1.0 - self.k) * p_minus;

        self.x_hat
    }

    /// Current state estimate.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        self.x_hat
    }

    /// Current estimate error covariance.
    #[must_use]
    pub fn error_covariance(&self) -> f64 {
        self.p
    }

    /// Gain used by the most recent update (0.0 before the first update).
    #[must_use]
    pub fn gain(&self) -> f64 {
        self.k
    }
}

/// Calibration constants for one sensor channel.
///
/// Validated once; every filter seeded from it is well formed.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawFilterParams")]
pub struct FilterParams {
    initial_estimate_error: f64,
    process_noise: f64,
    measurement_noise: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            initial_estimate_error: default_initial_estimate_error(),
            process_noise: default_process_noise(),
            measurement_noise: default_measurement_noise(),
        }
    }
}

impl FilterParams {
    /// Validates a set of channel calibration constants.
    ///
    /// # Errors
    ///
    /// Returns [`BmsError::InvalidFilter`] if a value is non-finite, the
    /// covariances are negative, or the measurement noise is not positive.
    pub fn new(
        initial_estimate_error: f64,
        process_noise: f64,
        measurement_noise: f64,
    ) -> Result<Self> {
        for (name, value) in [
            ("initial_estimate_error", initial_estimate_error),
            ("process_noise", process_noise),
            ("measurement_noise", measurement_noise),
        ] {
            if !value.is_finite() {
                return Err(BmsError::InvalidFilter(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }

        if initial_estimate_error < 0.0 {
            return Err(BmsError::InvalidFilter(
                "initial_estimate_error must be >= 0".to_string(),
            ));
        }

        if process_noise < 0.0 {
            return Err(BmsError::InvalidFilter(
                "process_noise must be >= 0".to_string(),
            ));
        }

        if measurement_noise <= 0.0 {
            return Err(BmsError::InvalidFilter(
                "measurement_noise must be > 0".to_string(),
            ));
        }

        Ok(Self {
            initial_estimate_error,
            process_noise,
            measurement_noise,
        })
    }

    /// Builds a filter whose estimate starts at `initial_value`.
    ///
    /// `initial_value` must be finite; callers feed it validated telemetry.
    #[must_use]
    pub fn seed(&self, initial_value: f64) -> ScalarFilter {
        ScalarFilter {
            x_hat: initial_value,
            p: self.initial_estimate_error,
            q: self.process_noise,
            r: self.measurement_noise,
            k: 0.0,
        }
    }

    /// Runs `raw` through the filter in `slot`, seeding it from `raw` on
    /// first sight.
    ///
    /// A filter whose state has gone non-finite is reseeded at `raw`, so one
    /// bad excursion cannot leave the channel stuck at NaN.
    pub fn smooth(&self, slot: &mut Option<ScalarFilter>, raw: f64) -> f64 {
        let filter = slot.get_or_insert_with(|| self.seed(raw));
        let value = filter.update(raw);
        if value.is_finite() && filter.error_covariance().is_finite() {
            value
        } else {
            warn!("Filter state diverged, reseeding at {}", raw);
            *filter = self.seed(raw);
            raw
        }
    }

    #[must_use]
    pub fn initial_estimate_error(&self) -> f64 {
        self.initial_estimate_error
    }

    #[must_use]
    pub fn process_noise(&self) -> f64 {
        self.process_noise
    }

    #[must_use]
    pub fn measurement_noise(&self) -> f64 {
        self.measurement_noise
    }
}

/// Unvalidated TOML shape of [`FilterParams`].
#[derive(Debug, Deserialize)]
struct RawFilterParams {
    #[serde(default = "default_initial_estimate_error")]
    initial_estimate_error: f64,

    #[serde(default = "default_process_noise")]
    process_noise: f64,

    #[serde(default = "default_measurement_noise")]
    measurement_noise: f64,
}

impl TryFrom<RawFilterParams> for FilterParams {
    type Error = BmsError;

    fn try_from(raw: RawFilterParams) -> Result<Self> {
        Self::new(raw.initial_estimate_error, raw.process_noise, raw.measurement_noise)
    }
}

fn default_initial_estimate_error() -> f64 { 1.0 }
fn default_process_noise() -> f64 { 0.01 }
fn default_measurement_noise() -> f64 { 0.01 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_follows_recursion() {
        let mut filter = ScalarFilter::new(0.0, 1.0, 0.01, 0.1).unwrap();

        // p⁻ = 1.01, k = 1.01 / 1.11
        let out = filter.update(1.2);
        let k = 1.01 / 1.11;
        assert!((filter.gain() - k).abs() < 1e-12);
        assert!((out - k * 1.2).abs() < 1e-12);
        assert!((filter.error_covariance() - (1.0 - k) * 1.01).abs() < 1e-12);
    }

    #[test]
    fn test_smooths_sensor_sequence() {
        let mut filter = ScalarFilter::new(0.0, 1.0, 0.01, 0.1).unwrap();
        let inputs = [1.2, 1.5, 1.8, 2.0, 2.5];
        let expected = [1.091892, 1.296952, 1.486079, 1.651806, 1.903720];

        for (input, want) in inputs.iter().zip(expected.iter()) {
            let got = filter.update(*input);
            assert!((got - want).abs() < 1e-5, "expected {}, got {}", want, got);
        }
    }

    #[test]
    fn test_converges_to_constant_measurement() {
        let mut filter = ScalarFilter::new(0.0, 1.0, 0.01, 0.1).unwrap();

        // Steady-state gain is ~0.27, so the error shrinks by ~0.73 per step
        let mut out = 0.0;
        for _ in 0..60 {
            out = filter.update(5.0);
        }
        assert!((out - 5.0).abs() < 1e-6, "filter did not converge: {}", out);
    }

    #[test]
    fn test_seeded_with_observation_returns_it() {
        let mut filter = FilterParams::default().seed(3.35);
        assert_eq!(filter.update(3.35), 3.35);
    }

    #[test]
    fn test_smooth_seeds_on_first_value() {
        let params = FilterParams::default();
        let mut slot = None;

        assert_eq!(params.smooth(&mut slot, 3.35), 3.35);
        assert!(slot.is_some());

        let next = params.smooth(&mut slot, 3.45);
        assert!(next > 3.35 && next < 3.45);
    }

    #[test]
    fn test_smooth_reseeds_diverged_filter() {
        let params = FilterParams::default();
        let mut slot = Some(params.seed(1.7e308));

        // The innovation overflows to -inf
        let value = params.smooth(&mut slot, -1.7e308);
        assert_eq!(value, -1.7e308);
        assert_eq!(slot.as_ref().unwrap().estimate(), -1.7e308);

        let value = params.smooth(&mut slot, 3.35);
        assert!(value.is_finite());
    }

    #[test]
    fn test_zero_process_noise_keeps_shrinking_gain() {
        let mut filter = ScalarFilter::new(0.0, 1.0, 0.0, 1.0).unwrap();
        filter.update(1.0);
        let first = filter.gain();
        filter.update(1.0);
        assert!(filter.gain() < first);
    }

    #[test]
    fn test_rejects_zero_measurement_noise() {
        assert!(ScalarFilter::new(0.0, 1.0, 0.01, 0.0).is_err());
    }

    #[test]
    fn test_rejects_negative_covariances() {
        assert!(ScalarFilter::new(0.0, -1.0, 0.01, 0.1).is_err());
        assert!(ScalarFilter::new(0.0, 1.0, -0.01, 0.1).is_err());
    }

    #[test]
    fn test_rejects_non_finite_values() {
        assert!(ScalarFilter::new(f64::NAN, 1.0, 0.01, 0.1).is_err());
        assert!(ScalarFilter::new(0.0, f64::INFINITY, 0.01, 0.1).is_err());
        assert!(FilterParams::new(1.0, 0.01, f64::NAN).is_err());
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: FilterParams = toml::from_str("process_noise = 0.05").unwrap();
        assert_eq!(params.initial_estimate_error(), 1.0);
        assert_eq!(params.process_noise(), 0.05);
        assert_eq!(params.measurement_noise(), 0.01);
    }

    #[test]
    fn test_params_deserialize_rejects_invalid() {
        let result: std::result::Result<FilterParams, _> =
            toml::from_str("measurement_noise = 0.0");
        assert!(result.is_err());
    }
}
