//! # Telemetry Records
//!
//! One reading from one cell, as delivered by the ingestion transport.
//!
//! ## JSON shape
//!
//! ```json
//! {
//!   "station": 1, "container": 2, "pack": 3, "cell": 4,
//!   "voltage": 3.71, "current": -0.42, "temperature": 24.8,
//!   "max_capacity": 100.0, "soh": 0.97,
//!   "timestamp": 1760000000, "state": "discharging"
//! }
//! ```
//!
//! ## Current sign
//!
//! Positive current flows into the cell (charging); negative current flows out
//! (discharging).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BmsError, Result};

/// Operating mode reported alongside a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingState {
    Idle,
    Charging,
    Discharging,
    FastCharging,
    FastDischarging,
}

impl OperatingState {
    /// Charging and fast charging read SOC off the charge curve; everything
    /// else uses the discharge curve.
    #[must_use]
    pub fn is_charging(self) -> bool {
        matches!(self, Self::Charging | Self::FastCharging)
    }
}

impl std::fmt::Display for OperatingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Charging => "Charging",
            Self::Discharging => "Discharging",
            Self::FastCharging => "FastCharging",
            Self::FastDischarging => "FastDischarging",
        };
        f.write_str(name)
    }
}

/// Latest reading of one battery cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub station: u32,
    pub container: u32,
    pub pack: u32,
    pub cell: u32,

    /// Volts.
    pub voltage: f64,
    /// Amps, positive while charging.
    pub current: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Rated capacity in ampere hours.
    pub max_capacity: f64,
    /// State of health as a fraction of the original rated capacity.
    #[serde(default = "default_soh")]
    pub soh: f64,

    /// Epoch seconds.
    pub timestamp: i64,
    pub state: OperatingState,
}

fn default_soh() -> f64 { 1.0 }

/// Largest terminal voltage magnitude accepted from a cell sensor (V).
pub const MAX_ABS_VOLTAGE: f64 = 1_000.0;
/// Largest current magnitude accepted from a cell sensor (A).
pub const MAX_ABS_CURRENT: f64 = 10_000.0;
/// Accepted cell temperature range (°C).
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = -273.15..=1_000.0;
/// Largest rated capacity accepted for one cell (Ah).
pub const MAX_CELL_CAPACITY: f64 = 1_000_000.0;

impl TelemetryRecord {
    /// Decodes a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`BmsError::MalformedRecord`] when the payload is not valid
    /// JSON, misses an identifier or field, or fails [`TelemetryRecord::validate`].
    pub fn from_json(payload: &str) -> Result<Self> {
        let record: Self = serde_json::from_str(payload)
            .map_err(|e| BmsError::MalformedRecord(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    /// Checks every numeric field before the record may touch an aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`BmsError::MalformedRecord`] if a measurement is non-finite
    /// or physically implausible, the capacity is out of range, or SOH lies
    /// outside `0.0..=1.0`.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("voltage", self.voltage),
            ("current", self.current),
            ("temperature", self.temperature),
            ("max_capacity", self.max_capacity),
            ("soh", self.soh),
        ] {
            if !value.is_finite() {
                return Err(BmsError::MalformedRecord(format!(
                    "{} must be finite, got {} ({})",
                    name,
                    value,
                    self.path()
                )));
            }
        }

        if self.voltage.abs() > MAX_ABS_VOLTAGE {
            return Err(BmsError::MalformedRecord(format!(
                "voltage magnitude must be <= {}, got {} ({})",
                MAX_ABS_VOLTAGE,
                self.voltage,
                self.path()
            )));
        }

        if self.current.abs() > MAX_ABS_CURRENT {
            return Err(BmsError::MalformedRecord(format!(
                "current magnitude must be <= {}, got {} ({})",
                MAX_ABS_CURRENT,
                self.current,
                self.path()
            )));
        }

        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(BmsError::MalformedRecord(format!(
                "temperature must be between {} and {}, got {} ({})",
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end(),
                self.temperature,
                self.path()
            )));
        }

        if !(0.0..=MAX_CELL_CAPACITY).contains(&self.max_capacity) {
            return Err(BmsError::MalformedRecord(format!(
                "max_capacity must be between 0 and {}, got {} ({})",
                MAX_CELL_CAPACITY,
                self.max_capacity,
                self.path()
            )));
        }

        if !(0.0..=1.0).contains(&self.soh) {
            return Err(BmsError::MalformedRecord(format!(
                "soh must be between 0.0 and 1.0, got {} ({})",
                self.soh,
                self.path()
            )));
        }

        Ok(())
    }

    /// `station/container/pack/cell` path, for log lines and errors.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}/{}/{}", self.station, self.container, self.pack, self.cell)
    }

    /// Timestamp as UTC, if representable.
    #[must_use]
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(station: u32, container: u32, pack: u32, cell: u32) -> TelemetryRecord {
    TelemetryRecord {
        station,
        container,
        pack,
        cell,
        voltage: 3.35,
        current: -0.5,
        temperature: 25.0,
        max_capacity: 100.0,
        soh: 1.0,
        timestamp: 1_700_000_000,
        state: OperatingState::Discharging,
    }
}
