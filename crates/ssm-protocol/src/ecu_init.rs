//! ECU Init Response
//!
//! Init response payload layout:
//!
//! ```text
//! [0xFF][SSM ID x3][ROM ID x5][capability bytes...]
//!   0     1..=3      4..=8       9..
//! ```
//!
//! Capability byte indexes in vendor logger definitions count from the first
//! byte after the marker, so index `n` lives at payload offset `1 + n`.

use crate::consts::RSP_INIT;
use crate::error::EcuInitError;
use crate::packet::{decode, Packet};

/// Offset of the ROM ID within the init payload
const ROM_ID_OFFSET: usize = 4;
/// ROM ID length in bytes
const ROM_ID_LEN: usize = 5;

/// Init response captured from a 2005 STi ECU, ROM ID `3D12594006`
pub const SAMPLE_INIT_RESPONSE: [u8; 62] = [
    0x80, 0xF0, 0x10, 0x39, 0xFF, 0xA2, 0x10, 0x11, 0x3D, 0x12, 0x59, 0x40, 0x06, 0x73, 0xFA,
    0xCB, 0xA6, 0x2B, 0x81, 0xFE, 0xA8, 0x00, 0x82, 0x00, 0x60, 0xCE, 0x54, 0xF8, 0xB1, 0xE4,
    0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xDC, 0x00, 0x00, 0x75, 0x1E, 0x30, 0xC0,
    0xF0, 0x22, 0x00, 0x00, 0x43, 0xFB, 0x00, 0xF1, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xF0, 0x3A,
];

/// Capability view over an ECU init response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuCapabilityMask {
    payload: Vec<u8>,
}

impl EcuCapabilityMask {
    /// Wrap a decoded init response packet
    pub fn from_packet(packet: Packet) -> Result<Self, EcuInitError> {
        match packet.payload.first() {
            Some(&RSP_INIT) => Ok(Self {
                payload: packet.payload,
            }),
            other => Err(EcuInitError::NotInitResponse(other.copied())),
        }
    }

    /// Mask built from [`SAMPLE_INIT_RESPONSE`]
    pub fn sample() -> Self {
        let payload = SAMPLE_INIT_RESPONSE[4..SAMPLE_INIT_RESPONSE.len() - 1].to_vec();
        debug_assert!(decode(&SAMPLE_INIT_RESPONSE).is_ok());
        Self { payload }
    }

    /// ROM ID as 10 uppercase hex characters
    pub fn rom_id(&self) -> Result<String, EcuInitError> {
        let end = ROM_ID_OFFSET + ROM_ID_LEN;
        if self.payload.len() < end {
            return Err(EcuInitError::TooShort(self.payload.len()));
        }
        Ok(hex::encode_upper(&self.payload[ROM_ID_OFFSET..end]))
    }

    /// Three-byte SSM protocol ID preceding the ROM ID
    pub fn ssm_id(&self) -> Option<String> {
        self.payload.get(1..ROM_ID_OFFSET).map(hex::encode_upper)
    }

    /// Test a capability bit.
    ///
    /// Indexes beyond the captured payload (or bits above 7) report
    /// unsupported rather than failing.
    pub fn is_supported(&self, byte_index: usize, bit_index: u8) -> bool {
        if bit_index > 7 {
            return false;
        }
        let Some(offset) = byte_index.checked_add(1) else {
            return false;
        };
        match self.payload.get(offset) {
            Some(byte) => (byte >> bit_index) & 1 == 1,
            None => false,
        }
    }

    /// Raw init payload, starting at the marker
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
