//! Simulated cells and fleets producing plausible telemetry.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::curve::SocCurve;
use crate::aggregate::record::{OperatingState, TelemetryRecord};
use crate::config::SimulationConfig;
use crate::estimation::CellModel;

/// Cells flip to discharging at this SOC...
const UPPER_SOC_BOUND: f64 = 0.95;
/// ...and back to charging at this one.
const LOWER_SOC_BOUND: f64 = 0.05;

/// Warming per amp of load, in °C.
const HEATING_PER_AMP: f64 = 2.0;

/// Peak-to-peak noise added to each synthetic channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorNoise {
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
}

/// One synthetic cell cycling between charge and discharge.
#[derive(Debug, Clone)]
pub struct SimulatedCell {
    pub station: u32,
    pub container: u32,
    pub pack: u32,
    pub cell: u32,
    /// Rated capacity when new, in ampere hours.
    pub rated_capacity: f64,
    /// Fraction of rated capacity still available.
    pub soh: f64,
    /// True SOC as a fraction.
    pub soc: f64,
    pub state: OperatingState,
}

impl SimulatedCell {
    /// Advances the true SOC by one step, reversing direction at the bounds.
    pub fn step(&mut self, soc_step: f64) {
        if self.state.is_charging() {
            self.soc = (self.soc + soc_step).min(1.0);
            if self.soc >= UPPER_SOC_BOUND {
                self.state = OperatingState::Discharging;
            }
        } else {
            self.soc = (self.soc - soc_step).max(0.0);
            if self.soc <= LOWER_SOC_BOUND {
                self.state = OperatingState::Charging;
            }
        }
    }

    /// Produces a noisy reading for the current true SOC.
    pub fn sample<R: Rng>(
        &self,
        curve: &SocCurve,
        noise: &SensorNoise,
        ambient_temperature: f64,
        timestamp: i64,
        rng: &mut R,
    ) -> TelemetryRecord {
        let voltage = curve.voltage(self.soc, self.state);
        let current = curve.current(self.soc, self.state);
        let temperature = ambient_temperature + HEATING_PER_AMP * current.abs();

        TelemetryRecord {
            station: self.station,
            container: self.container,
            pack: self.pack,
            cell: self.cell,
            voltage: voltage + jitter(rng, noise.voltage),
            current: current + jitter(rng, noise.current),
            temperature: temperature + jitter(rng, noise.temperature),
            max_capacity: self.rated_capacity * self.soh,
            soh: self.soh,
            timestamp,
            state: self.state,
        }
    }
}

fn jitter<R: Rng>(rng: &mut R, amplitude: f64) -> f64 {
    if amplitude > 0.0 {
        rng.gen_range(-amplitude..=amplitude)
    } else {
        0.0
    }
}

/// A full Station/Container/Pack/Cell grid of simulated cells.
#[derive(Debug)]
pub struct SimulatedFleet {
    cells: Vec<SimulatedCell>,
    curve: SocCurve,
    noise: SensorNoise,
    soc_step: f64,
    ambient_temperature: f64,
    rng: StdRng,
}

impl SimulatedFleet {
    /// Builds the grid described by `config`; ids start at 1 on every level.
    ///
    /// Each cell starts at a random SOC and direction with a slightly
    /// degraded state of health.
    #[must_use]
    pub fn new(config: &SimulationConfig, model: &CellModel) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut cells = Vec::new();
        for station in 1..=config.stations {
            for container in 1..=config.containers_per_station {
                for pack in 1..=config.packs_per_container {
                    for cell in 1..=config.cells_per_pack {
                        let state = if rng.gen_bool(0.5) {
                            OperatingState::Charging
                        } else {
                            OperatingState::Discharging
                        };
                        cells.push(SimulatedCell {
                            station,
                            container,
                            pack,
                            cell,
                            rated_capacity: config.cell_capacity_ah,
                            soh: rng.gen_range(0.9..=1.0),
                            soc: rng.gen_range(0.1..0.9),
                            state,
                        });
                    }
                }
            }
        }

        debug!("Simulated fleet with {} cells", cells.len());

        Self {
            cells,
            curve: SocCurve::new(model, config.discharge_current),
            noise: SensorNoise {
                voltage: config.voltage_noise,
                current: config.current_noise,
                temperature: config.temperature_noise,
            },
            soc_step: config.soc_step,
            ambient_temperature: config.ambient_temperature,
            rng,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[SimulatedCell] {
        &self.cells
    }

    /// Samples every cell at `timestamp`, then advances each one step.
    pub fn tick(&mut self, timestamp: i64) -> Vec<TelemetryRecord> {
        let mut records = Vec::with_capacity(self.cells.len());
        for cell in &mut self.cells {
            records.push(cell.sample(
                &self.curve,
                &self.noise,
                self.ambient_temperature,
                timestamp,
                &mut self.rng,
            ));
            cell.step(self.soc_step);
        }
        records
    }

    /// Mean true SOC across the fleet, weighted by usable capacity.
    #[must_use]
    pub fn true_soc(&self) -> Option<f64> {
        let (stored, usable) = self.cells.iter().fold((0.0, 0.0), |(stored, usable), cell| {
            let capacity = cell.rated_capacity * cell.soh;
            (stored + cell.soc * capacity, usable + capacity)
        });
        (usable > 0.0).then(|| stored / usable)
    }
}
