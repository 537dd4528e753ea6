//! SSM Protocol Implementation
//!
//! This crate provides blocking serial communication with Subaru ECUs using the
//! Subaru Select Monitor (SSM) protocol: frame encoding and decoding, ECU init
//! response inspection, conversion expressions and the serial session that
//! performs the handshake and batched memory reads.

mod cancel;
mod ecu_init;
mod error;
mod expression;
mod packet;
mod parameter;
mod session;
mod target;
mod transport;
mod unit;

#[cfg(test)]
mod test_log;

pub use cancel::{CancelSource, CancelToken};
pub use ecu_init::{EcuCapabilityMask, SAMPLE_INIT_RESPONSE};
pub use error::{DecodeError, EcuInitError, ParameterError, SessionError};
pub use expression::{evaluate, Expression, Op};
pub use parameter::{ParameterDefinition, StorageType, MAX_ADDRESS};
pub use packet::{decode, encode, hex_to_bytes, Packet, MAX_PAYLOAD, MAX_READ_ADDRESSES};
pub use session::{Backoff, ConnectOutcome, SerialSession, SessionConfig, SessionState};
pub use target::{LinkSettings, Target};
pub use transport::{
    MockPortProvider, MockTransport, PortInfo, PortProvider, SerialPortProvider, Transport,
};
pub use unit::{convert, DisplayUnit};

/// SSM wire constants
pub mod consts {
    /// Frame header byte
    pub const HEADER: u8 = 0x80;
    /// Engine control unit address
    pub const DESTINATION_ECU: u8 = 0x10;
    /// Transmission control unit address
    pub const DESTINATION_TCU: u8 = 0x18;
    /// Diagnostic tool address
    pub const SOURCE_DIAG: u8 = 0xF0;
    /// ECU init request
    pub const CMD_INIT: u8 = 0xBF;
    /// ECU init response marker
    pub const RSP_INIT: u8 = 0xFF;
    /// Read memory address request
    pub const CMD_READ_ADDRESS: u8 = 0xA8;
    /// Read memory address response marker
    pub const RSP_READ_ADDRESS: u8 = 0xE8;
    /// Single-response read mode (the padding byte after `CMD_READ_ADDRESS`)
    pub const READ_MODE_SINGLE: u8 = 0x00;
}
