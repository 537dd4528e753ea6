//! SSM Frame Codec
//!
//! Frame layout: `[0x80, destination, source, length, payload..., checksum]`
//! where `checksum` is the sum of all preceding bytes modulo 256.

use crate::consts::{CMD_INIT, CMD_READ_ADDRESS, HEADER, READ_MODE_SINGLE, SOURCE_DIAG};
use crate::error::DecodeError;
use crate::target::Target;
use tracing::warn;

/// Bytes before the payload (header, destination, source, length)
pub(crate) const PREFIX_LEN: usize = 4;
/// Smallest valid frame: prefix plus checksum
pub(crate) const MIN_FRAME_LEN: usize = PREFIX_LEN + 1;
/// Largest payload the single-byte length field can describe
pub const MAX_PAYLOAD: usize = u8::MAX as usize;
/// Most byte addresses one read request can carry (command, mode, then
/// three bytes per address)
pub const MAX_READ_ADDRESSES: usize = (MAX_PAYLOAD - 2) / 3;

/// A decoded SSM packet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    /// Destination address (ECU, TCU or diagnostic tool)
    pub destination: u8,
    /// Source address
    pub source: u8,
    /// Payload, excluding header, length and checksum
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet from its parts
    pub fn new(destination: u8, source: u8, payload: Vec<u8>) -> Self {
        Self {
            destination,
            source,
            payload,
        }
    }

    /// Init request sent by the diagnostic tool to the given target
    pub fn init_request(target: Target) -> Self {
        Self::new(target.destination(), SOURCE_DIAG, vec![CMD_INIT])
    }

    /// Batched read request for single-byte addresses.
    ///
    /// Returns `None` when the address list would overflow the length field.
    pub fn read_request(target: Target, addresses: &[u32]) -> Option<Self> {
        if addresses.len() > MAX_READ_ADDRESSES {
            return None;
        }
        let len = 2 + addresses.len() * 3;
        let mut payload = Vec::with_capacity(len);
        payload.push(CMD_READ_ADDRESS);
        payload.push(READ_MODE_SINGLE);
        for address in addresses {
            // 24-bit big-endian
            payload.extend_from_slice(&address.to_be_bytes()[1..]);
        }
        Some(Self::new(target.destination(), SOURCE_DIAG, payload))
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self.destination, self.source, &self.payload)
    }

    /// Parse wire bytes into a packet
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    /// Total size of the serialized frame
    pub fn frame_len(&self) -> usize {
        frame_len(self.payload.len())
    }

    /// Space-separated uppercase hex of the serialized frame, for logging
    pub fn to_hex(&self) -> String {
        to_hex(&self.to_bytes())
    }
}

/// Frame size for a payload of `payload_len` bytes
pub(crate) fn frame_len(payload_len: usize) -> usize {
    MIN_FRAME_LEN + payload_len
}

/// Sum of bytes modulo 256
pub(crate) fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build a frame.
///
/// The length field is a single byte; payloads longer than [`MAX_PAYLOAD`]
/// are truncated, with a warning, to keep the frame self-consistent.
/// Callers that must not lose bytes check the length first, as
/// [`Packet::read_request`] does.
pub fn encode(destination: u8, source: u8, payload: &[u8]) -> Vec<u8> {
    if payload.len() > MAX_PAYLOAD {
        warn!(
            "Payload of {} bytes truncated to {}",
            payload.len(),
            MAX_PAYLOAD
        );
    }
    let payload = &payload[..payload.len().min(MAX_PAYLOAD)];
    let mut frame = Vec::with_capacity(frame_len(payload.len()));
    frame.push(HEADER);
    frame.push(destination);
    frame.push(source);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    frame
}

/// Decode a complete frame
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }
    if bytes[0] != HEADER {
        return Err(DecodeError::BadHeader(bytes[0]));
    }

    let declared = bytes[3] as usize;
    let available = bytes.len() - MIN_FRAME_LEN;
    if declared != available {
        return Err(DecodeError::LengthMismatch {
            declared,
            available,
        });
    }

    let (body, tail) = bytes.split_at(bytes.len() - 1);
    let expected = checksum(body);
    if expected != tail[0] {
        return Err(DecodeError::ChecksumMismatch {
            expected,
            actual: tail[0],
        });
    }

    Ok(Packet {
        destination: bytes[1],
        source: bytes[2],
        payload: body[PREFIX_LEN..].to_vec(),
    })
}

/// Space-separated uppercase hex
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a whitespace-separated hex dump such as `"80 F0 10 0B"`.
///
/// Returns `None` on any malformed token.
pub fn hex_to_bytes(dump: &str) -> Option<Vec<u8>> {
    dump.split_whitespace()
        .map(|token| u8::from_str_radix(token, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_log::capture;
    use crate::consts::{DESTINATION_ECU, DESTINATION_TCU};
    use proptest::prelude::*;

    #[test]
    fn test_init_request_bytes() {
        let packet = Packet::init_request(Target::Ecu);
        assert_eq!(packet.to_bytes(), vec![0x80, 0x10, 0xF0, 0x01, 0xBF, 0x40]);

        let tcu = Packet::init_request(Target::Tcu);
        assert_eq!(tcu.destination, DESTINATION_TCU);
    }

    #[test]
    fn test_read_request_layout() {
        let packet = Packet::read_request(Target::Ecu, &[0x00000E, 0xFF4BA4]).unwrap();
        assert_eq!(packet.destination, DESTINATION_ECU);
        assert_eq!(
            packet.payload,
            vec![0xA8, 0x00, 0x00, 0x00, 0x0E, 0xFF, 0x4B, 0xA4]
        );
        assert_eq!(packet.frame_len(), 13);
    }

    #[test]
    fn test_read_request_too_large() {
        assert_eq!(MAX_READ_ADDRESSES, 84);
        let addresses = vec![0u32; 85];
        assert!(Packet::read_request(Target::Ecu, &addresses).is_none());
        let addresses = vec![0u32; 84];
        let packet = Packet::read_request(Target::Ecu, &addresses).unwrap();
        assert_eq!(packet.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn test_encode_oversized_payload_stays_consistent() {
        let payload: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let (bytes, logged) = capture(|| encode(0x10, 0xF0, &payload));
        assert!(logged.contains("truncated"), "{logged}");
        assert_eq!(bytes.len(), frame_len(MAX_PAYLOAD));
        assert_eq!(bytes[3], 0xFF);

        let packet = decode(&bytes).unwrap();
        assert_eq!(packet.payload, payload[..MAX_PAYLOAD].to_vec());
    }

    #[test]
    fn test_decode_documented_read_response() {
        let bytes = hex_to_bytes("80 F0 10 0B E8 7D 7A 7F 42 0B D4 10 28 E3 4E 73").unwrap();
        let packet = decode(&bytes).unwrap();
        assert_eq!(packet.destination, 0xF0);
        assert_eq!(packet.source, 0x10);
        assert_eq!(packet.payload.len(), 11);
        assert_eq!(packet.payload[0], 0xE8);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(&[0x80, 0x10, 0xF0]), Err(DecodeError::TooShort(3)));
        assert_eq!(
            decode(&[0x81, 0x10, 0xF0, 0x00, 0x81]),
            Err(DecodeError::BadHeader(0x81))
        );
        assert_eq!(
            decode(&[0x80, 0x10, 0xF0, 0x02, 0xBF, 0x00]),
            Err(DecodeError::LengthMismatch {
                declared: 2,
                available: 1
            })
        );
        assert_eq!(
            decode(&[0x80, 0x10, 0xF0, 0x01, 0xBF, 0x41]),
            Err(DecodeError::ChecksumMismatch {
                expected: 0x40,
                actual: 0x41
            })
        );
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(hex_to_bytes("80 f0 10"), Some(vec![0x80, 0xF0, 0x10]));
        assert_eq!(hex_to_bytes("80 zz"), None);
        assert_eq!(to_hex(&[0x80, 0x0A]), "80 0A");
    }

    proptest! {
        #[test]
        fn prop_checksum_round_trip(
            destination in any::<u8>(),
            source in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD),
        ) {
            let bytes = encode(destination, source, &payload);
            let packet = decode(&bytes).unwrap();
            prop_assert_eq!(packet, Packet::new(destination, source, payload));
        }

        #[test]
        fn prop_single_byte_corruption_rejected(
            destination in any::<u8>(),
            source in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            index in any::<proptest::sample::Index>(),
            delta in 1u8..=255,
        ) {
            let mut bytes = encode(destination, source, &payload);
            let i = index.index(bytes.len());
            bytes[i] = bytes[i].wrapping_add(delta);
            prop_assert!(decode(&bytes).is_err());
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
            let _ = decode(&bytes);
        }
    }
}
