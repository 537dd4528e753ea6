//! SSM Targets and Link Parameters

use crate::consts::{DESTINATION_ECU, DESTINATION_TCU};
use serde::{Deserialize, Serialize};

/// Control unit addressed by a session or selected by a catalog filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Engine control unit (vendor target `1`)
    Ecu,
    /// Transmission control unit (vendor target `2`)
    Tcu,
    /// Both units (vendor target `3`), only meaningful for catalog entries
    Both,
}

impl Target {
    /// Vendor numeric code used in logger definitions
    pub fn code(&self) -> u8 {
        match self {
            Target::Ecu => 1,
            Target::Tcu => 2,
            Target::Both => 3,
        }
    }

    /// Parse a vendor numeric code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Target::Ecu),
            2 => Some(Target::Tcu),
            3 => Some(Target::Both),
            _ => None,
        }
    }

    /// Destination byte for requests sent to this target
    pub fn destination(&self) -> u8 {
        match self {
            Target::Tcu => DESTINATION_TCU,
            Target::Ecu | Target::Both => DESTINATION_ECU,
        }
    }

    /// Whether an entry declared for `self` should be kept when the caller
    /// requested `requested`
    pub fn accepts(&self, requested: Target) -> bool {
        *self == Target::Both || *self == requested
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::Ecu
    }
}

/// Fixed serial line parameters for the SSM link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: u8,
}

impl Default for LinkSettings {
    fn default() -> Self {
        // 4800 8N1
        Self {
            baud_rate: 4800,
            data_bits: 8,
            stop_bits: 1,
        }
    }
}
