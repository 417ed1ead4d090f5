//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;

use crate::aggregate::shard::DEFAULT_SHARD_COUNT;
use crate::error::{BmsError, Result};
use crate::estimation::filter::FilterParams;
use crate::estimation::soc::{ChargeEstimator, DischargeEstimator, VoltageThresholds};
use crate::estimation::CellModel;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub discharge: DischargeConfig,

    #[serde(default)]
    pub charge: ChargeConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Aggregation engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

/// Per-channel noise filter calibration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    #[serde(default)]
    pub voltage: FilterParams,

    #[serde(default)]
    pub current: FilterParams,

    #[serde(default)]
    pub temperature: FilterParams,
}

/// Discharge curve knees (volts)
#[derive(Debug, Deserialize, Clone)]
pub struct DischargeConfig {
    #[serde(default = "default_discharge_max_voltage")]
    pub max_voltage: f64,

    #[serde(default = "default_discharge_mid_high_voltage")]
    pub mid_high_voltage: f64,

    #[serde(default = "default_discharge_mid_low_voltage")]
    pub mid_low_voltage: f64,

    #[serde(default = "default_discharge_min_voltage")]
    pub min_voltage: f64,
}

/// Charge curve knees (volts) and constant-charge current (amps)
#[derive(Debug, Deserialize, Clone)]
pub struct ChargeConfig {
    #[serde(default = "default_charge_max_voltage")]
    pub max_voltage: f64,

    #[serde(default = "default_charge_mid_high_voltage")]
    pub mid_high_voltage: f64,

    #[serde(default = "default_charge_mid_low_voltage")]
    pub mid_low_voltage: f64,

    #[serde(default = "default_charge_min_voltage")]
    pub min_voltage: f64,

    #[serde(default = "default_max_charging_current")]
    pub max_charging_current: f64,
}

/// Synthetic fleet used by the demo binary
#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_enabled")]
    pub enabled: bool,

    #[serde(default = "default_stations")]
    pub stations: u32,

    #[serde(default = "default_containers_per_station")]
    pub containers_per_station: u32,

    #[serde(default = "default_packs_per_container")]
    pub packs_per_container: u32,

    #[serde(default = "default_cells_per_pack")]
    pub cells_per_pack: u32,

    #[serde(default = "default_cell_capacity_ah")]
    pub cell_capacity_ah: f64,

    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    #[serde(default = "default_soc_step")]
    pub soc_step: f64,

    #[serde(default = "default_discharge_current")]
    pub discharge_current: f64,

    #[serde(default = "default_voltage_noise")]
    pub voltage_noise: f64,

    #[serde(default = "default_current_noise")]
    pub current_noise: f64,

    #[serde(default = "default_temperature_noise")]
    pub temperature_noise: f64,

    #[serde(default = "default_ambient_temperature")]
    pub ambient_temperature: f64,

    #[serde(default)]
    pub seed: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// When set, logs are also written to a daily rolling file here.
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_shard_count() -> usize { DEFAULT_SHARD_COUNT }
fn default_report_interval_ms() -> u64 { 5000 }

fn default_discharge_max_voltage() -> f64 { 4.25 }
fn default_discharge_mid_high_voltage() -> f64 { 3.7 }
fn default_discharge_mid_low_voltage() -> f64 { 3.0 }
fn default_discharge_min_voltage() -> f64 { 2.5 }

fn default_charge_max_voltage() -> f64 { 4.2 }
fn default_charge_mid_high_voltage() -> f64 { 3.8 }
fn default_charge_mid_low_voltage() -> f64 { 3.5 }
fn default_charge_min_voltage() -> f64 { 2.5 }
fn default_max_charging_current() -> f64 { 1.0 }

fn default_simulation_enabled() -> bool { true }
fn default_stations() -> u32 { 2 }
fn default_containers_per_station() -> u32 { 2 }
fn default_packs_per_container() -> u32 { 4 }
fn default_cells_per_pack() -> u32 { 16 }
fn default_cell_capacity_ah() -> f64 { 100.0 }
fn default_sample_interval_ms() -> u64 { 1000 }
fn default_soc_step() -> f64 { 0.002 }
fn default_discharge_current() -> f64 { -0.5 }
fn default_voltage_noise() -> f64 { 0.005 }
fn default_current_noise() -> f64 { 0.01 }
fn default_temperature_noise() -> f64 { 0.2 }
fn default_ambient_temperature() -> f64 { 25.0 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

impl Default for DischargeConfig {
    fn default() -> Self {
        Self {
            max_voltage: default_discharge_max_voltage(),
            mid_high_voltage: default_discharge_mid_high_voltage(),
            mid_low_voltage: default_discharge_mid_low_voltage(),
            min_voltage: default_discharge_min_voltage(),
        }
    }
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self {
            max_voltage: default_charge_max_voltage(),
            mid_high_voltage: default_charge_mid_high_voltage(),
            mid_low_voltage: default_charge_mid_low_voltage(),
            min_voltage: default_charge_min_voltage(),
            max_charging_current: default_max_charging_current(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: default_simulation_enabled(),
            stations: default_stations(),
            containers_per_station: default_containers_per_station(),
            packs_per_container: default_packs_per_container(),
            cells_per_pack: default_cells_per_pack(),
            cell_capacity_ah: default_cell_capacity_ah(),
            sample_interval_ms: default_sample_interval_ms(),
            soc_step: default_soc_step(),
            discharge_current: default_discharge_current(),
            voltage_noise: default_voltage_noise(),
            current_noise: default_current_noise(),
            temperature_noise: default_temperature_noise(),
            ambient_temperature: default_ambient_temperature(),
            seed: None,
        }
    }
}

impl DischargeConfig {
    /// Validated discharge curve knees.
    ///
    /// # Errors
    ///
    /// Returns [`BmsError::InvalidThresholds`] if the knees are not strictly decreasing.
    pub fn thresholds(&self) -> Result<VoltageThresholds> {
        VoltageThresholds::new(
            self.max_voltage,
            self.mid_high_voltage,
            self.mid_low_voltage,
            self.min_voltage,
        )
    }
}

impl ChargeConfig {
    /// Validated charge curve knees.
    ///
    /// # Errors
    ///
    /// Returns [`BmsError::InvalidThresholds`] if the knees are not strictly decreasing.
    pub fn thresholds(&self) -> Result<VoltageThresholds> {
        VoltageThresholds::new(
            self.max_voltage,
            self.mid_high_voltage,
            self.mid_low_voltage,
            self.min_voltage,
        )
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fleet_bms::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns error if TOML parsing or validation fails
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Calibration shared by every cell, built from the filter and curve sections
    ///
    /// # Errors
    ///
    /// Returns error if the curve thresholds or charging current are invalid
    pub fn cell_model(&self) -> Result<CellModel> {
        let discharge = DischargeEstimator::new(self.discharge.thresholds()?);
        let charge = ChargeEstimator::new(
            self.charge.thresholds()?,
            self.charge.max_charging_current,
        )?;

        Ok(CellModel::new(
            self.filter.voltage,
            self.filter.current,
            self.filter.temperature,
            discharge,
            charge,
        ))
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Validate engine configuration
        if self.engine.shard_count == 0 || self.engine.shard_count > 4096 {
            return Err(BmsError::Config(
                toml::de::Error::custom("shard_count must be between 1 and 4096")
            ));
        }

        if self.engine.report_interval_ms == 0 || self.engine.report_interval_ms > 3_600_000 {
            return Err(BmsError::Config(
                toml::de::Error::custom("report_interval_ms must be between 1 and 3600000")
            ));
        }

        // Curves and charging current
        self.cell_model()?;

        // Validate simulation configuration
        if self.simulation.enabled {
            self.validate_simulation()?;
        }

        if let Some(dir) = &self.logging.log_dir {
            if dir.is_empty() {
                return Err(BmsError::Config(
                    toml::de::Error::custom("log_dir cannot be empty when set")
                ));
            }
        }

        Ok(())
    }

    fn validate_simulation(&self) -> Result<()> {
        let sim = &self.simulation;

        for (name, value) in [
            ("stations", sim.stations),
            ("containers_per_station", sim.containers_per_station),
            ("packs_per_container", sim.packs_per_container),
            ("cells_per_pack", sim.cells_per_pack),
        ] {
            if value == 0 {
                return Err(BmsError::Config(
                    toml::de::Error::custom(format!("{} must be greater than 0", name))
                ));
            }
        }

        if !sim.cell_capacity_ah.is_finite() || sim.cell_capacity_ah <= 0.0 {
            return Err(BmsError::Config(
                toml::de::Error::custom("cell_capacity_ah must be greater than 0")
            ));
        }

        if sim.sample_interval_ms == 0 || sim.sample_interval_ms > 3_600_000 {
            return Err(BmsError::Config(
                toml::de::Error::custom("sample_interval_ms must be between 1 and 3600000")
            ));
        }

        if !(sim.soc_step > 0.0 && sim.soc_step <= 0.1) {
            return Err(BmsError::Config(
                toml::de::Error::custom("soc_step must be between 0.0 (exclusive) and 0.1")
            ));
        }

        if !sim.discharge_current.is_finite() || sim.discharge_current > 0.0 {
            return Err(BmsError::Config(
                toml::de::Error::custom("discharge_current must be <= 0 (positive current means charging)")
            ));
        }

        for (name, value) in [
            ("voltage_noise", sim.voltage_noise),
            ("current_noise", sim.current_noise),
            ("temperature_noise", sim.temperature_noise),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(BmsError::Config(
                    toml::de::Error::custom(format!("{} must be >= 0", name))
                ));
            }
        }

        if !sim.ambient_temperature.is_finite() {
            return Err(BmsError::Config(
                toml::de::Error::custom("ambient_temperature must be finite")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_file_matches_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.engine.shard_count, 16);
        assert_eq!(config.engine.report_interval_ms, 5000);
        assert_eq!(config.discharge.max_voltage, 4.25);
        assert_eq!(config.charge.max_charging_current, 1.0);
        assert_eq!(config.filter.voltage, FilterParams::default());
        assert!(config.simulation.enabled);
        assert!(config.logging.log_dir.is_none());
    }

    #[test]
    fn test_shipped_default_file() {
        let config = Config::parse(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config.engine.shard_count, 16);
        assert_eq!(config.charge.mid_high_voltage, 3.8);
        assert_eq!(config.filter.current, FilterParams::default());
        assert_eq!(config.simulation.cells_per_pack, 16);
        assert!(config.simulation.seed.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[engine]
shard_count = 8
report_interval_ms = 1000

[filter.voltage]
measurement_noise = 0.05

[filter.current]

[filter.temperature]
process_noise = 0.001

[discharge]
max_voltage = 4.2

[charge]
max_charging_current = 2.0

[simulation]
stations = 3
seed = 42

[logging]
log_dir = "./logs"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.engine.shard_count, 8);
        assert_eq!(config.filter.voltage.measurement_noise(), 0.05);
        assert_eq!(config.filter.temperature.process_noise(), 0.001);
        assert_eq!(config.discharge.max_voltage, 4.2);
        assert_eq!(config.discharge.mid_high_voltage, 3.7);
        assert_eq!(config.charge.max_charging_current, 2.0);
        assert_eq!(config.simulation.stations, 3);
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.logging.log_dir.as_deref(), Some("./logs"));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/fleet-bms.toml"),
            Err(BmsError::Io(_))
        ));
    }

    #[test]
    fn test_invalid_filter_in_file() {
        let result = Config::parse("[filter.current]\nmeasurement_noise = 0.0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_shard_count_zero() {
        let mut config = create_valid_config();
        config.engine.shard_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shard_count_too_high() {
        let mut config = create_valid_config();
        config.engine.shard_count = 4097;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_report_interval_zero() {
        let mut config = create_valid_config();
        config.engine.report_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_collapsed_discharge_thresholds() {
        let mut config = create_valid_config();
        config.discharge.mid_high_voltage = config.discharge.max_voltage;
        assert!(matches!(config.validate(), Err(BmsError::InvalidThresholds(_))));
    }

    #[test]
    fn test_inverted_charge_thresholds() {
        let mut config = create_valid_config();
        config.charge.min_voltage = 3.6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_charging_current() {
        let mut config = create_valid_config();
        config.charge.max_charging_current = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulation_zero_cells() {
        let mut config = create_valid_config();
        config.simulation.cells_per_pack = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulation_ignored_when_disabled() {
        let mut config = create_valid_config();
        config.simulation.enabled = false;
        config.simulation.cells_per_pack = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_simulation_positive_discharge_current() {
        let mut config = create_valid_config();
        config.simulation.discharge_current = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulation_soc_step_out_of_range() {
        let mut config = create_valid_config();
        config.simulation.soc_step = 0.0;
        assert!(config.validate().is_err());

        config.simulation.soc_step = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulation_negative_noise() {
        let mut config = create_valid_config();
        config.simulation.voltage_noise = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir() {
        let mut config = create_valid_config();
        config.logging.log_dir = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cell_model_uses_configured_curves() {
        let mut config = create_valid_config();
        config.charge.max_charging_current = 2.0;
        let model = config.cell_model().unwrap();
        assert_eq!(model.charge.max_charging_current(), 2.0);
        assert_eq!(model.discharge.thresholds().max(), 4.25);
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_shard_count(), 16);
        assert_eq!(default_report_interval_ms(), 5000);
        assert_eq!(default_discharge_max_voltage(), 4.25);
        assert_eq!(default_discharge_mid_high_voltage(), 3.7);
        assert_eq!(default_discharge_mid_low_voltage(), 3.0);
        assert_eq!(default_discharge_min_voltage(), 2.5);
        assert_eq!(default_charge_max_voltage(), 4.2);
        assert_eq!(default_charge_mid_high_voltage(), 3.8);
        assert_eq!(default_charge_mid_low_voltage(), 3.5);
        assert_eq!(default_charge_min_voltage(), 2.5);
        assert_eq!(default_max_charging_current(), 1.0);
        assert_eq!(default_stations(), 2);
        assert_eq!(default_cells_per_pack(), 16);
        assert_eq!(default_sample_interval_ms(), 1000);
        assert_eq!(default_discharge_current(), -0.5);
    }
}
