//! Derived Measurements

use crate::snapshot::Measurement;
use ssm_protocol::{convert, DisplayUnit};

/// Fixed sea-level atmospheric pressure. No altitude or weather
/// compensation.
pub const ATMOSPHERIC_PRESSURE_KPA: f32 = 101.3;

/// Emit `output` as gauge pressure whenever `source` (an absolute pressure)
/// is measured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugePressureRule {
    /// Catalog name of the absolute-pressure parameter
    pub source: String,
    /// Name of the emitted measurement
    pub output: String,
}

impl GaugePressureRule {
    pub fn new(source: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
        }
    }
}

impl Default for GaugePressureRule {
    fn default() -> Self {
        Self::new("MAP", "Boost Gauge")
    }
}

/// Absolute pressure to gauge pressure in kPa. `None` for non-pressure units.
pub fn gauge_pressure(value: f32, unit: DisplayUnit) -> Option<f32> {
    let kpa = match unit {
        DisplayUnit::Kpa => value,
        DisplayUnit::Psi | DisplayUnit::Bar => convert(value, unit, DisplayUnit::Kpa),
        _ => return None,
    };
    Some(kpa - ATMOSPHERIC_PRESSURE_KPA)
}

/// Apply a rule to an absolute-pressure measurement
pub(crate) fn apply_gauge_rule(output: &str, source: &Measurement) -> Option<Measurement> {
    gauge_pressure(source.value, source.unit)
        .map(|gauge| Measurement::new(output, gauge, DisplayUnit::Kpa, source.timestamp))
}
