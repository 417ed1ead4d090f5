//! # Aggregate Tree
//!
//! Station → Container → Pack → Cell hierarchy holding the latest smoothed
//! reading of every cell.
//!
//! Every branch level has the same shape: an ordered map from child id to
//! child aggregate plus cached capacity totals. Children are created the first
//! time a record names them and are never removed.
//!
//! Totals are derived, not maintained: `update` only touches the one cell the
//! record addresses, and `recalculate` walks the whole subtree and rewrites the
//! cached totals on the way back up. Between passes the cached totals are
//! stale.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use tracing::debug;

use super::record::TelemetryRecord;
use super::CapacityTotals;
use crate::estimation::filter::ScalarFilter;
use crate::estimation::CellModel;

/// One level of the aggregate tree.
pub trait Aggregate: Default {
    /// Applies a validated record to this subtree.
    fn update(&mut self, record: &TelemetryRecord, model: &CellModel);

    /// Re-derives and caches this subtree's totals.
    fn recalculate(&mut self) -> CapacityTotals;

    /// Totals cached by the last recalculation.
    fn totals(&self) -> CapacityTotals;

    /// Number of cells below (and including) this node.
    fn cell_count(&self) -> usize;
}

/// Latest state of one cell.
#[derive(Debug, Clone, Default)]
pub struct CellAggregate {
    /// Most recent record, with voltage/current/temperature smoothed.
    record: Option<TelemetryRecord>,
    voltage_filter: Option<ScalarFilter>,
    current_filter: Option<ScalarFilter>,
    temperature_filter: Option<ScalarFilter>,
    max_capacity: f64,
    /// Fraction 0.0..=1.0.
    estimated_soc: f64,
}

impl CellAggregate {
    /// Smoothed record from the latest update, if any.
    #[must_use]
    pub fn record(&self) -> Option<&TelemetryRecord> {
        self.record.as_ref()
    }

    #[must_use]
    pub fn max_capacity(&self) -> f64 {
        self.max_capacity
    }

    /// Estimated SOC as a fraction of `max_capacity`.
    #[must_use]
    pub fn estimated_soc(&self) -> f64 {
        self.estimated_soc
    }

    /// Ampere hours currently stored.
    #[must_use]
    pub fn estimated_capacity(&self) -> f64 {
        self.estimated_soc * self.max_capacity
    }

    /// State of health carried on the latest record.
    #[must_use]
    pub fn soh(&self) -> Option<f64> {
        self.record.as_ref().map(|r| r.soh)
    }
}

impl Aggregate for CellAggregate {
    fn update(&mut self, record: &TelemetryRecord, model: &CellModel) {
        let mut smoothed = record.clone();
        smoothed.voltage = model.voltage_filter.smooth(&mut self.voltage_filter, record.voltage);
        smoothed.current = model.current_filter.smooth(&mut self.current_filter, record.current);
        smoothed.temperature = model
            .temperature_filter
            .smooth(&mut self.temperature_filter, record.temperature);

        let soc_percent = if smoothed.state.is_charging() {
            model.charge.estimate(smoothed.voltage, smoothed.current)
        } else {
            model.discharge.estimate(smoothed.voltage)
        };

        self.max_capacity = smoothed.max_capacity;
        self.estimated_soc = soc_percent / 100.0;
        self.record = Some(smoothed);
    }

    fn recalculate(&mut self) -> CapacityTotals {
        self.totals()
    }

    fn totals(&self) -> CapacityTotals {
        CapacityTotals::new(self.max_capacity, self.estimated_capacity())
    }

    fn cell_count(&self) -> usize {
        usize::from(self.record.is_some())
    }
}

/// Picks which identifier of a record addresses the children of a level.
pub trait Routing {
    /// Level name used in log lines.
    const CHILD: &'static str;

    fn child_id(record: &TelemetryRecord) -> u32;
}

/// Packs route to cells.
#[derive(Debug)]
pub struct ByCell;

/// Containers route to packs.
#[derive(Debug)]
pub struct ByPack;

/// Stations route to containers.
#[derive(Debug)]
pub struct ByContainer;

impl Routing for ByCell {
    const CHILD: &'static str = "cell";

    fn child_id(record: &TelemetryRecord) -> u32 {
        record.cell
    }
}

impl Routing for ByPack {
    const CHILD: &'static str = "pack";

    fn child_id(record: &TelemetryRecord) -> u32 {
        record.pack
    }
}

impl Routing for ByContainer {
    const CHILD: &'static str = "container";

    fn child_id(record: &TelemetryRecord) -> u32 {
        record.container
    }
}

/// A non-leaf level: children keyed by id plus cached totals.
#[derive(Debug)]
pub struct Branch<C, R> {
    children: BTreeMap<u32, C>,
    totals: CapacityTotals,
    _routing: PhantomData<R>,
}

pub type PackAggregate = Branch<CellAggregate, ByCell>;
pub type ContainerAggregate = Branch<PackAggregate, ByPack>;
pub type StationAggregate = Branch<ContainerAggregate, ByContainer>;

impl<C, R> Default for Branch<C, R> {
    fn default() -> Self {
        Self {
            children: BTreeMap::new(),
            totals: CapacityTotals::default(),
            _routing: PhantomData,
        }
    }
}

impl<C: Aggregate, R: Routing> Branch<C, R> {
    #[must_use]
    pub fn child(&self, id: u32) -> Option<&C> {
        self.children.get(&id)
    }

    /// Children in ascending id order.
    pub fn children(&self) -> impl Iterator<Item = (u32, &C)> {
        self.children.iter().map(|(id, child)| (*id, child))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl<C: Aggregate, R: Routing> Aggregate for Branch<C, R> {
    fn update(&mut self, record: &TelemetryRecord, model: &CellModel) {
        let id = R::child_id(record);
        let child = self.children.entry(id).or_insert_with(|| {
            debug!("New {} {} under {}", R::CHILD, id, record.path());
            C::default()
        });
        child.update(record, model);
    }

    fn recalculate(&mut self) -> CapacityTotals {
        self.totals = self
            .children
            .values_mut()
            .map(Aggregate::recalculate)
            .sum();
        self.totals
    }

    fn totals(&self) -> CapacityTotals {
        self.totals
    }

    fn cell_count(&self) -> usize {
        self.children.values().map(Aggregate::cell_count).sum()
    }
}
