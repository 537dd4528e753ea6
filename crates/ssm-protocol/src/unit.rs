//! Display Units
//!
//! Units declared by parameter definitions, plus the pure conversion used
//! when a consumer wants to re-express a measurement.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Stoichiometric air/fuel ratio for gasoline
const STOICH_AFR: f32 = 14.7;
const KM_PER_MILE: f32 = 1.60934;

/// Unit attached to a parameter or measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayUnit {
    Unknown,
    Celsius,
    Fahrenheit,
    Bar,
    Psi,
    Kpa,
    Mph,
    Kmh,
    Lambda,
    Afr,
    Degrees,
    Rpm,
    Percent,
    Volts,
    Milliamps,
    Milliseconds,
    GramsPerSec,
    GramsPerRev,
    Dam,
    Multiplier,
    Switch,
}

impl DisplayUnit {
    const ALL: [DisplayUnit; 21] = [
        DisplayUnit::Unknown,
        DisplayUnit::Celsius,
        DisplayUnit::Fahrenheit,
        DisplayUnit::Bar,
        DisplayUnit::Psi,
        DisplayUnit::Kpa,
        DisplayUnit::Mph,
        DisplayUnit::Kmh,
        DisplayUnit::Lambda,
        DisplayUnit::Afr,
        DisplayUnit::Degrees,
        DisplayUnit::Rpm,
        DisplayUnit::Percent,
        DisplayUnit::Volts,
        DisplayUnit::Milliamps,
        DisplayUnit::Milliseconds,
        DisplayUnit::GramsPerSec,
        DisplayUnit::GramsPerRev,
        DisplayUnit::Dam,
        DisplayUnit::Multiplier,
        DisplayUnit::Switch,
    ];

    /// Unit strings accepted for this unit; the first is the display name
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            DisplayUnit::Unknown => &[""],
            DisplayUnit::Celsius => &["°C"],
            DisplayUnit::Fahrenheit => &["°F"],
            DisplayUnit::Bar => &["bar"],
            DisplayUnit::Psi => &["psi"],
            DisplayUnit::Kpa => &["kPa"],
            DisplayUnit::Mph => &["mph"],
            DisplayUnit::Kmh => &["km/h"],
            DisplayUnit::Lambda => &["lambda"],
            DisplayUnit::Afr => &["AFR"],
            DisplayUnit::Degrees => &["°", "deg"],
            DisplayUnit::Rpm => &["rpm"],
            DisplayUnit::Percent => &["%"],
            DisplayUnit::Volts => &["V"],
            DisplayUnit::Milliamps => &["mA"],
            DisplayUnit::Milliseconds => &["ms"],
            DisplayUnit::GramsPerSec => &["g/s"],
            DisplayUnit::GramsPerRev => &["g/rev"],
            DisplayUnit::Dam => &["dam"],
            DisplayUnit::Multiplier => &["multiplier"],
            DisplayUnit::Switch => &["switch"],
        }
    }

    pub fn display_name(&self) -> &'static str {
        self.names()[0]
    }

    /// Map a vendor unit string. Unrecognized strings become `Unknown`.
    pub fn from_units(units: &str) -> Self {
        let units = units.trim();
        match Self::ALL.iter().find(|unit| unit.names().contains(&units)) {
            Some(unit) => *unit,
            None => {
                warn!("Unknown unit '{}'", units);
                DisplayUnit::Unknown
            }
        }
    }

    /// Units a value of this unit can be re-expressed in, including itself
    pub fn compatible_units(&self) -> Vec<DisplayUnit> {
        use DisplayUnit::*;
        match self {
            Bar | Psi | Kpa => vec![Bar, Psi, Kpa],
            Celsius | Fahrenheit => vec![Celsius, Fahrenheit],
            Mph | Kmh => vec![Mph, Kmh],
            Lambda | Afr => vec![Lambda, Afr],
            Dam | Multiplier => vec![Dam, Multiplier],
            other => vec![*other],
        }
    }
}

impl std::fmt::Display for DisplayUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Re-express `value` from one unit in another.
///
/// Unsupported pairs return `value` unchanged.
pub fn convert(value: f32, from: DisplayUnit, to: DisplayUnit) -> f32 {
    use DisplayUnit::*;
    if from == to || from == Unknown {
        return value;
    }

    match (from, to) {
        (Dam, Multiplier) | (Multiplier, Dam) => value,
        (Lambda, Afr) => value * STOICH_AFR,
        (Afr, Lambda) => value / STOICH_AFR,

        (Psi, Kpa) => value * 6.894_757,
        (Kpa, Psi) => value * 0.145_038,
        (Psi, Bar) => value * 0.068_947_6,
        (Kpa, Bar) => value * 0.01,
        (Bar, Psi) => value * 14.503_8,
        (Bar, Kpa) => value * 100.0,

        (Fahrenheit, Celsius) => (value - 32.0) * 5.0 / 9.0,
        (Celsius, Fahrenheit) => value * 9.0 / 5.0 + 32.0,

        (Mph, Kmh) => value * KM_PER_MILE,
        (Kmh, Mph) => value / KM_PER_MILE,

        _ => {
            warn!("Unsupported conversion from '{}' to '{}'", from, to);
            value
        }
    }
}
