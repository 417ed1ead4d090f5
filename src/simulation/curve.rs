//! Inverse SOC curves: the voltage and current a healthy cell shows at a given
//! state of charge. Built from the same knees as the forward estimators, so a
//! noise-free sample maps back onto the SOC it was generated from.

use crate::aggregate::record::OperatingState;
use crate::estimation::soc::VoltageThresholds;
use crate::estimation::CellModel;

/// SOC → (voltage, current) mapping for synthetic readings.
#[derive(Debug, Clone, Copy)]
pub struct SocCurve {
    discharge: VoltageThresholds,
    charge: VoltageThresholds,
    max_charging_current: f64,
    discharge_current: f64,
}

impl SocCurve {
    /// `discharge_current` is the constant (negative) load current drawn
    /// while discharging.
    #[must_use]
    pub fn new(model: &CellModel, discharge_current: f64) -> Self {
        Self {
            discharge: *model.discharge.thresholds(),
            charge: *model.charge.thresholds(),
            max_charging_current: model.charge.max_charging_current(),
            discharge_current,
        }
    }

    /// Terminal voltage at `soc` (fraction, clamped to 0.0..=1.0).
    #[must_use]
    pub fn voltage(&self, soc: f64, state: OperatingState) -> f64 {
        let soc = soc.clamp(0.0, 1.0);

        if state.is_charging() {
            let t = &self.charge;
            if soc >= 0.80 {
                t.max()
            } else if soc >= 0.15 {
                t.mid_high() + (soc - 0.15) / 0.65 * (t.max() - t.mid_high())
            } else if soc >= 0.05 {
                t.mid_low() + (soc - 0.05) / 0.10 * (t.mid_high() - t.mid_low())
            } else {
                t.min() + soc / 0.05 * (t.mid_low() - t.min())
            }
        } else {
            let t = &self.discharge;
            if soc >= 0.90 {
                t.mid_high() + (soc - 0.90) / 0.10 * (t.max() - t.mid_high())
            } else if soc >= 0.10 {
                t.mid_low() + (soc - 0.10) / 0.80 * (t.mid_high() - t.mid_low())
            } else {
                t.min() + soc / 0.10 * (t.mid_low() - t.min())
            }
        }
    }

    /// Cell current at `soc`; positive while charging.
    ///
    /// Charging holds the constant-charge current up to 80% and then tapers
    /// linearly to zero at full charge.
    #[must_use]
    pub fn current(&self, soc: f64, state: OperatingState) -> f64 {
        let soc = soc.clamp(0.0, 1.0);

        match state {
            OperatingState::Charging | OperatingState::FastCharging => {
                if soc > 0.80 {
                    self.max_charging_current * (1.0 - (soc - 0.80) / 0.20)
                } else {
                    self.max_charging_current
                }
            }
            OperatingState::Discharging | OperatingState::FastDischarging => self.discharge_current,
            OperatingState::Idle => 0.0,
        }
    }
}
