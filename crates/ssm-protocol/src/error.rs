//! SSM Error Types

use thiserror::Error;

/// Errors produced when decoding a raw SSM frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than the smallest possible frame
    #[error("Frame too short: {0} bytes (minimum 5)")]
    TooShort(usize),

    /// First byte is not the SSM header
    #[error("Bad frame header: expected 80, got {0:02X}")]
    BadHeader(u8),

    /// Declared payload length does not fit the available bytes
    #[error("Length mismatch: header declares {declared} payload bytes, {available} available")]
    LengthMismatch { declared: usize, available: usize },

    /// Trailing checksum does not match the computed sum
    #[error("Checksum mismatch: expected {expected:02X}, got {actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Errors produced when inspecting an ECU init response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcuInitError {
    /// Payload does not start with the init response marker
    #[error("Not an init response (payload starts with {0:02X?})")]
    NotInitResponse(Option<u8>),

    /// Payload too short to contain a ROM ID
    #[error("Init response too short: {0} payload bytes (minimum 9)")]
    TooShort(usize),
}

/// Errors produced when building a parameter definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("Unsupported parameter length {0} (must be 1, 2 or 4)")]
    UnsupportedLength(u8),

    #[error("Address {0:06X} does not fit in 24 bits")]
    AddressOutOfRange(u32),

    #[error("Switch bit {0} out of range (0-7)")]
    InvalidBit(u8),
}

/// Errors that can occur during an SSM serial session
#[derive(Debug, Error)]
pub enum SessionError {
    /// No serial interface was found
    #[error("No serial device found")]
    NoDevice,

    /// Operation requires an open transport
    #[error("Session is not connected")]
    NotConnected,

    /// Serial port could not be opened
    #[error("Failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    /// Writing the request failed (usually an unplugged cable)
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Nothing was received before the read timeout
    #[error("No response from ECU")]
    NoResponse,

    /// Fewer than three bytes arrived
    #[error("Incomplete response header ({0} bytes)")]
    IncompleteHeader(usize),

    /// Received bytes contain no frame addressed to the diagnostic tool
    #[error("Response frame not found in {0} received bytes")]
    ResponseNotFound(usize),

    /// Response frame checksum failed
    #[error("Response checksum mismatch: expected {expected:02X}, got {actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// Response frame failed to decode for a reason other than its checksum
    #[error("Framing error: {0}")]
    Framing(DecodeError),

    /// Read timed out before the expected byte count arrived
    #[error("Read timeout: got {got} of {expected} bytes")]
    ReadTimeout { got: usize, expected: usize },

    /// Batched request does not fit the single-byte length field
    #[error("Read request too large: {addresses} addresses")]
    RequestTooLarge { addresses: usize },

    /// Response decoded but is not the expected kind
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Underlying I/O failure
    #[error("Serial I/O error: {0}")]
    Io(String),

    /// Cancellation was observed while waiting
    #[error("Operation cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether the error means the physical link is gone and the session
    /// must reconnect immediately, rather than counting toward the
    /// consecutive-failure threshold.
    pub fn is_link_fault(&self) -> bool {
        matches!(
            self,
            SessionError::NoDevice
                | SessionError::NotConnected
                | SessionError::Open { .. }
                | SessionError::WriteFailed(_)
                | SessionError::Io(_)
        )
    }

    /// Whether the request itself was rejected before any I/O
    pub fn is_request_error(&self) -> bool {
        matches!(self, SessionError::RequestTooLarge { .. })
    }
}

impl From<DecodeError> for SessionError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::ChecksumMismatch { expected, actual } => {
                SessionError::ChecksumMismatch { expected, actual }
            }
            other => SessionError::Framing(other),
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}
