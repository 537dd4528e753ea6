//! Built-in parameter list, used before a logger definition is available.

use crate::catalog::ParameterCatalog;
use ssm_protocol::{DisplayUnit, ParameterDefinition};
use tracing::warn;

/// `(id, name, address, length, expression, unit)`
const BOOTSTRAP: &[(&str, &str, u32, u8, &str, DisplayUnit)] = &[
    ("P8", "Engine Speed", 0x0E, 2, "x/4", DisplayUnit::Rpm),
    ("P2", "Coolant Temp", 0x08, 1, "x-40", DisplayUnit::Celsius),
    ("P25", "Boost", 0x24, 1, "x-128", DisplayUnit::Kpa),
    ("P13", "Throttle", 0x15, 1, "x*100/255", DisplayUnit::Percent),
    ("P10", "Ignition Timing", 0x11, 1, "(x-128)/2", DisplayUnit::Degrees),
    ("P23", "Knock Correction", 0x22, 1, "(x-128)/2", DisplayUnit::Degrees),
    ("P11", "Intake Air Temp", 0x12, 1, "x-40", DisplayUnit::Celsius),
    ("P17", "Battery Voltage", 0x1C, 1, "x*8/100", DisplayUnit::Volts),
    ("P7", "MAP", 0x0D, 1, "x", DisplayUnit::Kpa),
    ("P9", "Vehicle Speed", 0x10, 1, "x", DisplayUnit::Kmh),
    ("P12", "Mass Airflow", 0x13, 2, "x/100", DisplayUnit::GramsPerSec),
];

/// The eleven core dashboard parameters
pub fn bootstrap_parameters() -> Vec<ParameterDefinition> {
    BOOTSTRAP
        .iter()
        .filter_map(|&(id, name, address, length, expression, unit)| {
            ParameterDefinition::new(id, name, address, length, expression, unit)
                .map_err(|e| warn!("Bootstrap parameter {} rejected: {}", id, e))
                .ok()
        })
        .collect()
}

/// [`bootstrap_parameters`] as a catalog with the default aliases
pub fn bootstrap_catalog() -> ParameterCatalog<ParameterDefinition> {
    ParameterCatalog::from_entries(bootstrap_parameters())
}
