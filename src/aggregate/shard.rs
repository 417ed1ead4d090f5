//! # Shard Table
//!
//! Top-level entry point of the engine. Stations are spread over a fixed
//! number of shards by `station % shard_count`; each shard owns one lock over
//! its whole subtree.
//!
//! ## Locking
//!
//! - `update` and `recalculate` take the shard lock exclusively
//! - read-only walks (`with_station`, counts) take it shared
//! - different shards never contend
//!
//! Fleet totals are the sum of per-shard snapshots taken one after another, so
//! they are consistent per shard but not across shards.
//!
//! ## Usage
//!
//! ```
//! use fleet_bms::aggregate::record::{OperatingState, TelemetryRecord};
//! use fleet_bms::aggregate::shard::ShardTable;
//!
//! let table = ShardTable::with_defaults();
//! table.ingest(&TelemetryRecord {
//!     station: 1, container: 1, pack: 1, cell: 1,
//!     voltage: 3.35, current: -0.5, temperature: 25.0,
//!     max_capacity: 100.0, soh: 1.0,
//!     timestamp: 1_700_000_000, state: OperatingState::Discharging,
//! })?;
//!
//! let totals = table.snapshot_totals();
//! assert!((totals.current_capacity - 50.0).abs() < 1e-9);
//! # Ok::<(), fleet_bms::error::BmsError>(())
//! ```

use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock};
use serde::de::Error;
use tracing::{debug, info, warn};

use super::record::TelemetryRecord;
use super::tree::{Aggregate, StationAggregate};
use super::CapacityTotals;
use crate::config::Config;
use crate::error::{BmsError, Result};
use crate::estimation::CellModel;

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 16;

#[derive(Debug, Default)]
struct ShardState {
    stations: BTreeMap<u32, StationAggregate>,
    totals: CapacityTotals,
}

/// One partition of the station keyspace.
#[derive(Debug, Default)]
pub struct Shard {
    state: RwLock<ShardState>,
}

impl Shard {
    /// Applies a validated record under the shard's exclusive lock.
    pub(crate) fn update(&self, record: &TelemetryRecord, model: &CellModel) {
        let mut state = self.state.write();
        let station = state.stations.entry(record.station).or_insert_with(|| {
            debug!("New station {}", record.station);
            StationAggregate::default()
        });
        station.update(record, model);
    }

    /// Recalculates every station in this shard and caches the sum.
    pub fn recalculate(&self) -> CapacityTotals {
        let mut state = self.state.write();
        let totals: CapacityTotals = state
            .stations
            .values_mut()
            .map(Aggregate::recalculate)
            .sum();
        state.totals = totals;
        totals
    }

    /// Totals from this shard's last recalculation.
    #[must_use]
    pub fn totals(&self) -> CapacityTotals {
        self.state.read().totals
    }

    /// Runs `f` against one station's subtree under the shared lock.
    pub fn with_station<T>(&self, station: u32, f: impl FnOnce(Option<&StationAggregate>) -> T) -> T {
        let state = self.state.read();
        f(state.stations.get(&station))
    }

    #[must_use]
    pub fn station_count(&self) -> usize {
        self.state.read().stations.len()
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.state
            .read()
            .stations
            .values()
            .map(Aggregate::cell_count)
            .sum()
    }
}

/// All shards plus the fleet-wide cached totals.
///
/// Records only enter through [`ShardTable::ingest`], which validates them
/// first; there is no public path around that check.
///
/// ```compile_fail
/// # use fleet_bms::aggregate::record::{OperatingState, TelemetryRecord};
/// # use fleet_bms::aggregate::shard::ShardTable;
/// let table = ShardTable::with_defaults();
/// table.update(&TelemetryRecord {
///     station: 1, container: 1, pack: 1, cell: 1,
///     voltage: f64::NAN, current: 0.0, temperature: 25.0,
///     max_capacity: 100.0, soh: 1.0,
///     timestamp: 0, state: OperatingState::Idle,
/// });
/// ```
#[derive(Debug)]
pub struct ShardTable {
    shards: Vec<Shard>,
    model: CellModel,
    totals: Mutex<CapacityTotals>,
}

impl ShardTable {
    /// Creates an engine with `shard_count` empty shards.
    ///
    /// # Errors
    ///
    /// Returns [`BmsError::Config`] if `shard_count` is zero.
    pub fn new(shard_count: usize, model: CellModel) -> Result<Self> {
        if shard_count == 0 {
            return Err(BmsError::Config(toml::de::Error::custom(
                "shard_count must be greater than 0",
            )));
        }

        Ok(Self::build(shard_count, model))
    }

    /// Default shard count and default Li-ion calibration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::build(DEFAULT_SHARD_COUNT, CellModel::default())
    }

    fn build(shard_count: usize, model: CellModel) -> Self {
        let shards = (0..shard_count).map(|_| Shard::default()).collect();
        info!("Aggregation engine ready with {} shards", shard_count);

        Self {
            shards,
            model,
            totals: Mutex::new(CapacityTotals::default()),
        }
    }

    /// Builds the engine from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured calibration or shard count is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.engine.shard_count, config.cell_model()?)
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub fn model(&self) -> &CellModel {
        &self.model
    }

    /// Index of the shard owning `station`.
    #[must_use]
    pub fn shard_for(&self, station: u32) -> usize {
        station as usize % self.shards.len()
    }

    /// Validates a record and applies it to its shard.
    ///
    /// # Errors
    ///
    /// Returns [`BmsError::MalformedRecord`] without touching any aggregate
    /// if the record fails validation.
    pub fn ingest(&self, record: &TelemetryRecord) -> Result<()> {
        if let Err(e) = record.validate() {
            warn!("Rejected telemetry record: {}", e);
            return Err(e);
        }

        self.update(record);
        Ok(())
    }

    /// Routes an already-validated record to its shard.
    pub(crate) fn update(&self, record: &TelemetryRecord) {
        self.shards[self.shard_for(record.station)].update(record, &self.model);
    }

    /// Recalculates every shard, each under its own lock, and caches the
    /// fleet-wide sum.
    ///
    /// Concurrent passes are serialized on the cached totals, so the cache
    /// always holds the sum of the pass that finished last.
    pub fn recalculate(&self) -> CapacityTotals {
        let mut cached = self.totals.lock();
        let totals: CapacityTotals = self.shards.iter().map(Shard::recalculate).sum();
        *cached = totals;
        drop(cached);

        debug!(
            "Recalculated fleet totals: max {:.3} Ah, current {:.3} Ah",
            totals.max_capacity, totals.current_capacity
        );
        totals
    }

    /// Fresh fleet totals for reporting and export.
    pub fn snapshot_totals(&self) -> CapacityTotals {
        self.recalculate()
    }

    /// Fleet totals from the last recalculation, without walking the tree.
    #[must_use]
    pub fn totals(&self) -> CapacityTotals {
        *self.totals.lock()
    }

    /// Runs `f` against one station's subtree under its shard's shared lock.
    ///
    /// `f` must not call back into the table; the shard lock is held.
    pub fn with_station<T>(&self, station: u32, f: impl FnOnce(Option<&StationAggregate>) -> T) -> T {
        self.shards[self.shard_for(station)].with_station(station, f)
    }

    #[must_use]
    pub fn station_count(&self) -> usize {
        self.shards.iter().map(Shard::station_count).sum()
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.shards.iter().map(Shard::cell_count).sum()
    }
}
