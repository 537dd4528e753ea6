//! SSM Serial Session
//!
//! Owns the transport for one physical link. All I/O is blocking and
//! sequential; the K-line adapter echoes every transmitted byte back before
//! the ECU answers, so responses are located after the echo.

use crate::cancel::CancelToken;
use crate::consts::{HEADER, RSP_INIT, RSP_READ_ADDRESS, SOURCE_DIAG};
use crate::ecu_init::EcuCapabilityMask;
use crate::error::SessionError;
use crate::packet::{decode, frame_len, to_hex, Packet, MAX_READ_ADDRESSES, PREFIX_LEN};
use crate::parameter::ParameterDefinition;
use crate::target::{LinkSettings, Target};
use crate::transport::{PortProvider, Transport};
use std::borrow::Borrow;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest single read issued while waiting for an init response
const INIT_READ_CHUNK: usize = 256;

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Control unit to handshake with
    pub target: Target,
    /// Serial line parameters
    pub link: LinkSettings,
    /// Per-read timeout
    pub read_timeout: Duration,
    /// Write timeout
    pub write_timeout: Duration,
    /// Settle delay between writing a request and reading the reply
    pub post_write_delay: Duration,
    /// Consecutive soft failures before a reconnect
    pub failure_threshold: u32,
    /// First reconnect delay
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling
    pub backoff_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target: Target::Ecu,
            link: LinkSettings::default(),
            read_timeout: Duration::from_millis(2000),
            write_timeout: Duration::from_millis(500),
            post_write_delay: Duration::from_millis(50),
            failure_threshold: 3,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// A permission request is outstanding; retry `connect` later
    AwaitingPermission,
    Connected,
}

/// Non-error outcomes of [`SerialSession::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    PendingPermission,
}

/// Exponential reconnect delays: `initial`, doubling, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial.min(max),
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial.min(self.max);
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Serial session with an ECU or TCU
pub struct SerialSession {
    provider: Box<dyn PortProvider>,
    config: SessionConfig,
    state: SessionState,
    transport: Option<Box<dyn Transport>>,
    capabilities: Option<EcuCapabilityMask>,
    consecutive_failures: u32,
}

impl SerialSession {
    pub fn new(provider: impl PortProvider + 'static, config: SessionConfig) -> Self {
        Self {
            provider: Box::new(provider),
            config,
            state: SessionState::Disconnected,
            transport: None,
            capabilities: None,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Capability mask from the most recent successful handshake
    pub fn capabilities(&self) -> Option<&EcuCapabilityMask> {
        self.capabilities.as_ref()
    }

    /// Open the first available serial interface.
    ///
    /// Missing permission is not an error: it is requested once and
    /// [`ConnectOutcome::PendingPermission`] is returned until granted.
    pub fn connect(&mut self) -> Result<ConnectOutcome, SessionError> {
        if self.is_connected() {
            return Ok(ConnectOutcome::Connected);
        }

        let Some(port) = self.provider.available().into_iter().next() else {
            warn!("No serial devices found");
            self.state = SessionState::Disconnected;
            return Err(SessionError::NoDevice);
        };

        if !self.provider.has_permission(&port) {
            if self.state != SessionState::AwaitingPermission {
                info!("Requesting permission for {}", port.name);
                self.provider.request_permission(&port);
                self.state = SessionState::AwaitingPermission;
            }
            return Ok(ConnectOutcome::PendingPermission);
        }

        match self.provider.open(&port, &self.config.link) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = SessionState::Connected;
                self.consecutive_failures = 0;
                info!("Connected to {}", port.name);
                Ok(ConnectOutcome::Connected)
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Release the transport. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            info!("Disconnected");
        }
        self.state = SessionState::Disconnected;
        self.capabilities = None;
    }

    /// Send an init request and return the decoded response.
    ///
    /// An init response (`0xFF` marker) also replaces the stored capability
    /// mask.
    pub fn send_init(&mut self, target: Target) -> Result<Packet, SessionError> {
        let request = Packet::init_request(target);
        info!("Sending init packet: {}", request.to_hex());
        self.write_request(&request.to_bytes())?;

        let mut received = Vec::with_capacity(INIT_READ_CHUNK);
        while received.len() < 3 {
            if self.read_chunk(&mut received, INIT_READ_CHUNK)? == 0 {
                break;
            }
        }
        match received.len() {
            0 => {
                warn!("No response to init");
                return Err(SessionError::NoResponse);
            }
            n if n < 3 => {
                warn!("Incomplete init response header ({} bytes)", n);
                return Err(SessionError::IncompleteHeader(n));
            }
            _ => {}
        }

        let start = loop {
            if let Some(start) = find_response_start(&received) {
                break start;
            }
            if self.read_chunk(&mut received, INIT_READ_CHUNK)? == 0 {
                warn!("Could not find response in received data");
                debug!("Received ({} bytes): {}", received.len(), to_hex(&received));
                return Err(SessionError::ResponseNotFound(received.len()));
            }
        };

        let end = start + frame_len(received[start + 3] as usize);
        while received.len() < end {
            let want = end - received.len();
            if self.read_chunk(&mut received, want)? == 0 {
                break;
            }
        }
        let frame = &received[start..end.min(received.len())];
        debug!("Response ({} bytes): {}", frame.len(), to_hex(frame));

        let response = decode(frame)?;
        if response.payload.first() == Some(&RSP_INIT) {
            let mask = EcuCapabilityMask::from_packet(response.clone())
                .map_err(|e| SessionError::UnexpectedResponse(e.to_string()))?;
            match mask.rom_id() {
                Ok(rom_id) => info!("ECU init successful, ROM ID: {}", rom_id),
                Err(e) => warn!("ECU init response without ROM ID: {}", e),
            }
            self.capabilities = Some(mask);
        }
        Ok(response)
    }

    /// Init the configured target and return its capability mask
    pub fn handshake(&mut self) -> Result<EcuCapabilityMask, SessionError> {
        let response = self.send_init(self.config.target)?;
        EcuCapabilityMask::from_packet(response)
            .map_err(|e| SessionError::UnexpectedResponse(e.to_string()))
    }

    /// Read every byte of `parameters` in one batched request.
    ///
    /// Returns the value bytes in request order; a multi-byte parameter
    /// occupies `length` consecutive entries.
    pub fn read_parameters<P>(&mut self, parameters: &[P]) -> Result<Vec<u8>, SessionError>
    where
        P: Borrow<ParameterDefinition>,
    {
        let addresses: Vec<u32> = parameters
            .iter()
            .flat_map(|p| p.borrow().byte_addresses())
            .collect();
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let request = Packet::read_request(self.config.target, &addresses).ok_or(
            SessionError::RequestTooLarge {
                addresses: addresses.len(),
            },
        )?;
        let request_bytes = request.to_bytes();

        let request_len = request_bytes.len();
        let response_len = frame_len(1 + addresses.len());
        let expected = request_len + response_len;
        debug!(
            "Expecting to read: request echo={} + response={} = {} bytes",
            request_len, response_len, expected
        );
        debug!("Sending read request: {}", request.to_hex());

        self.write_request(&request_bytes)?;

        let mut received = Vec::with_capacity(expected);
        while received.len() < expected {
            let want = expected - received.len();
            if self.read_chunk(&mut received, want)? == 0 {
                break;
            }
        }
        if received.len() < expected {
            warn!("Read timeout: got {} of {} bytes", received.len(), expected);
            debug!("Partial data: {}", to_hex(&received));
            return Err(SessionError::ReadTimeout {
                got: received.len(),
                expected,
            });
        }
        debug!("Received ({} bytes): {}", received.len(), to_hex(&received));

        let (echo, frame) = received.split_at(request_len);
        if echo != request_bytes.as_slice() {
            debug!("Echo differs from request: {}", to_hex(echo));
        }

        let response = decode(frame)?;
        match response.payload.split_first() {
            Some((&RSP_READ_ADDRESS, values)) if values.len() == addresses.len() => {
                Ok(values.to_vec())
            }
            Some((&RSP_READ_ADDRESS, values)) => Err(SessionError::UnexpectedResponse(format!(
                "{} values for {} addresses",
                values.len(),
                addresses.len()
            ))),
            Some((marker, _)) => Err(SessionError::UnexpectedResponse(format!(
                "response type {:02X}",
                marker
            ))),
            None => Err(SessionError::UnexpectedResponse("empty payload".into())),
        }
    }

    /// Read `parameters` in as many requests as their byte addresses need.
    ///
    /// Parameters are never split across requests. Values come back in
    /// parameter order, laid out as by [`read_parameters`](Self::read_parameters).
    pub fn read_batched<P>(&mut self, parameters: &[P]) -> Result<Vec<u8>, SessionError>
    where
        P: Borrow<ParameterDefinition>,
    {
        let batches = batch_by_addresses(parameters, MAX_READ_ADDRESSES);
        if batches.len() > 1 {
            debug!("Reading {} parameters in {} requests", parameters.len(), batches.len());
        }

        let mut values = Vec::new();
        for batch in batches {
            values.extend(self.read_parameters(batch)?);
        }
        Ok(values)
    }

    /// Count a failed exchange. Returns `true` when the session should
    /// reconnect. Rejected requests are not counted.
    pub fn record_failure(&mut self, error: &SessionError) -> bool {
        if error.is_request_error() {
            warn!("Request rejected: {}", error);
            return false;
        }
        if error.is_link_fault() {
            warn!("Link fault: {}", error);
            return true;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.failure_threshold {
            warn!(
                "{} consecutive failures, last: {}",
                self.consecutive_failures, error
            );
            true
        } else {
            debug!(
                "Failure {}/{}: {}",
                self.consecutive_failures, self.config.failure_threshold, error
            );
            false
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Drop the link and retry connect + handshake with exponential backoff
    /// until one succeeds or `cancel` fires.
    pub fn reconnect(&mut self, cancel: &CancelToken) -> Result<EcuCapabilityMask, SessionError> {
        self.disconnect();
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);

        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            info!("Attempting to connect to ECU...");
            match self.connect() {
                Ok(ConnectOutcome::Connected) => match self.handshake() {
                    Ok(mask) => {
                        self.consecutive_failures = 0;
                        return Ok(mask);
                    }
                    Err(e) => {
                        warn!("Init failed, disconnecting: {}", e);
                        self.disconnect();
                    }
                },
                Ok(ConnectOutcome::PendingPermission) => {
                    info!("Waiting for serial permission");
                }
                Err(e) => warn!("Connection failed: {}", e),
            }

            let delay = backoff.next_delay();
            warn!("Retrying in {}ms", delay.as_millis());
            if cancel.wait(delay) {
                return Err(SessionError::Cancelled);
            }
        }
    }

    fn write_request(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let timeout = self.config.write_timeout;
        let transport = self.transport.as_mut().ok_or(SessionError::NotConnected)?;
        if let Err(e) = transport.write(bytes, timeout) {
            warn!("Write failed, disconnecting: {}", e);
            self.disconnect();
            return Err(SessionError::WriteFailed(e.to_string()));
        }
        if !self.config.post_write_delay.is_zero() {
            std::thread::sleep(self.config.post_write_delay);
        }
        Ok(())
    }

    /// Append up to `max` bytes to `out`; returns the count read, 0 on timeout
    fn read_chunk(&mut self, out: &mut Vec<u8>, max: usize) -> Result<usize, SessionError> {
        let timeout = self.config.read_timeout;
        let transport = self.transport.as_mut().ok_or(SessionError::NotConnected)?;
        let mut buf = vec![0u8; max.max(1)];
        match transport.read(&mut buf, timeout) {
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Err(e) => {
                warn!("Read failed, disconnecting: {}", e);
                self.disconnect();
                Err(e.into())
            }
        }
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Consecutive runs of `parameters` holding at most `limit` byte addresses
/// each. A parameter longer than `limit` gets a run of its own.
fn batch_by_addresses<P>(parameters: &[P], limit: usize) -> Vec<&[P]>
where
    P: Borrow<ParameterDefinition>,
{
    let mut batches = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, parameter) in parameters.iter().enumerate() {
        let length = parameter.borrow().length();
        if used + length > limit && i > start {
            batches.push(&parameters[start..i]);
            start = i;
            used = 0;
        }
        used += length;
    }
    if start < parameters.len() {
        batches.push(&parameters[start..]);
    }
    batches
}

/// Start of the first frame addressed to the diagnostic tool whose length
/// byte has arrived. The echoed request is addressed to the ECU and skipped.
fn find_response_start(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(PREFIX_LEN)
        .position(|w| w[0] == HEADER && w[1] == SOURCE_DIAG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::ecu_init::SAMPLE_INIT_RESPONSE;
    use crate::packet::{encode, hex_to_bytes};
    use crate::transport::{MockPortProvider, MockTransport};
    use crate::unit::DisplayUnit;
    use crate::StorageType;

    fn test_config() -> SessionConfig {
        SessionConfig {
            post_write_delay: Duration::ZERO,
            read_timeout: Duration::from_millis(10),
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            ..Default::default()
        }
    }

    fn session_with(transport: &MockTransport) -> (SerialSession, MockPortProvider) {
        let provider = MockPortProvider::new(transport.clone());
        let session = SerialSession::new(provider.clone(), test_config());
        (session, provider)
    }

    fn documented_parameters() -> Vec<ParameterDefinition> {
        let p = |id: &str, name: &str, address: u32, length: u8, expr: &str| {
            ParameterDefinition::new(id, name, address, length, expr, DisplayUnit::Unknown)
                .unwrap()
        };
        vec![
            p("P3", "A/F Correction #1", 0x09, 1, "(x-128)*100/128"),
            p("P4", "A/F Learning #1", 0x0A, 1, "(x-128)*100/128"),
            p("P58", "A/F Sensor #1", 0x46, 1, "x/128"),
            p("E1", "Boost Error*", 0xFF4BA4, 4, "x*.1333224")
                .with_storage_type(Some(StorageType::Float)),
            p("P8", "Engine Speed", 0x0E, 2, "x/4"),
            p("P24", "Manifold Relative Pressure", 0x24, 1, "x-128"),
        ]
    }

    #[test]
    fn test_backoff_schedule() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<u64> = backoff.take(7).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10, 10]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_connect_no_device() {
        let mut session = SerialSession::new(MockPortProvider::empty(), test_config());
        assert!(matches!(session.connect(), Err(SessionError::NoDevice)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_connect_pending_permission() {
        let provider = MockPortProvider::new(MockTransport::new()).requiring_permission();
        let mut session = SerialSession::new(provider.clone(), test_config());

        assert_eq!(session.connect().unwrap(), ConnectOutcome::PendingPermission);
        assert_eq!(session.state(), SessionState::AwaitingPermission);
        assert_eq!(session.connect().unwrap(), ConnectOutcome::PendingPermission);
        assert_eq!(provider.permission_requests(), 1);

        provider.grant_permission();
        assert_eq!(session.connect().unwrap(), ConnectOutcome::Connected);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_operations_require_connection() {
        let (mut session, _) = session_with(&MockTransport::new());
        assert!(matches!(
            session.send_init(Target::Ecu),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn test_init_skips_echo() {
        let transport = MockTransport::new();
        transport.push_response(SAMPLE_INIT_RESPONSE.to_vec());
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();

        let response = session.send_init(Target::Ecu).unwrap();
        assert_eq!(response.payload.len(), 57);
        assert_eq!(
            session.capabilities().unwrap().rom_id().unwrap(),
            "3D12594006"
        );
        assert_eq!(
            transport.written(),
            vec![vec![0x80, 0x10, 0xF0, 0x01, 0xBF, 0x40]]
        );
    }

    #[test]
    fn test_init_reassembles_chunked_response() {
        let transport = MockTransport::new();
        transport.set_chunk_size(Some(5));
        transport.push_response(SAMPLE_INIT_RESPONSE.to_vec());
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();

        let mask = session.handshake().unwrap();
        assert_eq!(mask, EcuCapabilityMask::sample());
    }

    #[test]
    fn test_init_failure_reasons() {
        let transport = MockTransport::new();
        transport.set_echo(false);
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();

        transport.push_response(vec![]);
        assert!(matches!(
            session.send_init(Target::Ecu),
            Err(SessionError::NoResponse)
        ));

        transport.push_response(vec![0x80, 0xF0]);
        assert!(matches!(
            session.send_init(Target::Ecu),
            Err(SessionError::IncompleteHeader(2))
        ));

        transport.push_response(vec![0x00, 0x11, 0x22, 0x33]);
        assert!(matches!(
            session.send_init(Target::Ecu),
            Err(SessionError::ResponseNotFound(4))
        ));

        let mut corrupt = SAMPLE_INIT_RESPONSE.to_vec();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        transport.push_response(corrupt);
        assert!(matches!(
            session.send_init(Target::Ecu),
            Err(SessionError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_batched_read_documented_response() {
        let transport = MockTransport::new();
        let response = hex_to_bytes("80 F0 10 0B E8 7D 7A 7F 42 0B D4 10 28 E3 4E 73").unwrap();
        transport.push_response(response);
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();

        let parameters = documented_parameters();
        let values = session.read_parameters(&parameters).unwrap();
        assert_eq!(values.len(), 10);

        let request = &transport.written()[0];
        // 7 + 3 * 10 bytes, addresses in parameter order
        assert_eq!(request.len(), 37);
        assert_eq!(&request[4..6], &[0xA8, 0x00]);
        assert_eq!(&request[6..9], &[0x00, 0x00, 0x09]);
        assert_eq!(&request[15..18], &[0xFF, 0x4B, 0xA4]);
        assert_eq!(&request[24..27], &[0xFF, 0x4B, 0xA7]);

        let mut offset = 0;
        let mut decoded = Vec::new();
        for parameter in &parameters {
            decoded.push(parameter.convert(&values, offset).unwrap());
            offset += parameter.length();
        }
        let expected = [-2.34375, -4.6875, 0.9921875, 4.6605635, 2616.75, -50.0];
        for (actual, expected) in decoded.iter().zip(expected) {
            assert!((actual - expected).abs() < 0.001, "{actual} != {expected}");
        }
    }

    #[test]
    fn test_read_timeout_and_bad_marker() {
        let transport = MockTransport::new();
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();
        let parameters = &documented_parameters()[..1];

        transport.push_response(vec![0x80, 0xF0]);
        assert!(matches!(
            session.read_parameters(parameters),
            Err(SessionError::ReadTimeout { got: 12, expected: 17 })
        ));

        transport.push_response(encode(0xF0, 0x10, &[0xE9, 0x7D]));
        assert!(matches!(
            session.read_parameters(parameters),
            Err(SessionError::UnexpectedResponse(_))
        ));

        transport.push_response(encode(0xF0, 0x10, &[0xE8, 0x7D]));
        assert_eq!(session.read_parameters(parameters).unwrap(), vec![0x7D]);
    }

    #[test]
    fn test_empty_read_sends_nothing() {
        let transport = MockTransport::new();
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();
        let none: Vec<ParameterDefinition> = Vec::new();
        assert!(session.read_parameters(&none).unwrap().is_empty());
        assert_eq!(transport.write_count(), 0);
    }

    #[test]
    fn test_oversized_read_rejected() {
        let transport = MockTransport::new();
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();
        let parameters: Vec<ParameterDefinition> = (0..22)
            .map(|i| {
                ParameterDefinition::new("p", "p", i * 4, 4, "x", DisplayUnit::Unknown).unwrap()
            })
            .collect();
        assert!(matches!(
            session.read_parameters(&parameters),
            Err(SessionError::RequestTooLarge { addresses: 88 })
        ));
    }

    #[test]
    fn test_oversized_read_split_into_batches() {
        let transport = MockTransport::new();
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();
        let parameters: Vec<ParameterDefinition> = (0..30)
            .map(|i| {
                ParameterDefinition::new("p", "p", 0x100 + i * 4, 4, "x", DisplayUnit::Unknown)
                    .unwrap()
            })
            .collect();

        // 21 parameters fill 84 addresses, the other 9 take 36
        let first: Vec<u8> = (0..84).map(|i| i as u8).collect();
        let second: Vec<u8> = (84..120).map(|i| i as u8).collect();
        transport.push_response(encode(0xF0, 0x10, &[&[0xE8][..], &first[..]].concat()));
        transport.push_response(encode(0xF0, 0x10, &[&[0xE8][..], &second[..]].concat()));

        let values = session.read_batched(&parameters).unwrap();
        assert_eq!(values, (0..120).map(|i| i as u8).collect::<Vec<_>>());

        let written = transport.written();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].len(), 7 + 3 * 84);
        assert_eq!(written[1].len(), 7 + 3 * 36);
        assert_eq!(&written[1][6..9], &[0x00, 0x01, 0x54]);
    }

    #[test]
    fn test_batch_boundaries() {
        let p = |length: u8| {
            ParameterDefinition::new("p", "p", 0, length, "x", DisplayUnit::Unknown).unwrap()
        };
        let parameters = vec![p(2), p(1), p(1), p(4), p(1)];
        let sizes: Vec<usize> = batch_by_addresses(&parameters, 4)
            .iter()
            .map(|batch| batch.len())
            .collect();
        assert_eq!(sizes, vec![3, 1, 1]);

        let none: Vec<ParameterDefinition> = Vec::new();
        assert!(batch_by_addresses(&none, 4).is_empty());
    }

    #[test]
    fn test_rejected_request_does_not_count() {
        let (mut session, _) = session_with(&MockTransport::new());
        let too_large = SessionError::RequestTooLarge { addresses: 120 };
        for _ in 0..5 {
            assert!(!session.record_failure(&too_large));
        }
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[test]
    fn test_write_failure_disconnects() {
        let transport = MockTransport::new();
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();
        transport.set_fail_writes(true);

        let err = session.read_parameters(&documented_parameters()).unwrap_err();
        assert!(matches!(err, SessionError::WriteFailed(_)));
        assert!(session.record_failure(&err));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(transport.is_closed());
    }

    #[test]
    fn test_failure_threshold() {
        let (mut session, _) = session_with(&MockTransport::new());
        let timeout = SessionError::ReadTimeout { got: 0, expected: 17 };
        assert!(!session.record_failure(&timeout));
        assert!(!session.record_failure(&timeout));
        session.record_success();
        assert!(!session.record_failure(&timeout));
        assert!(!session.record_failure(&timeout));
        assert!(session.record_failure(&timeout));
    }

    #[test]
    fn test_reconnect_retries_until_handshake() {
        let transport = MockTransport::new();
        transport.push_response(vec![]);
        transport.push_response(SAMPLE_INIT_RESPONSE.to_vec());
        let (mut session, provider) = session_with(&transport);

        let mask = session.reconnect(&CancelToken::never()).unwrap();
        assert_eq!(mask.rom_id().unwrap(), "3D12594006");
        assert!(session.is_connected());
        assert_eq!(provider.open_count(), 2);
    }

    #[test]
    fn test_reconnect_observes_cancellation() {
        let source = CancelSource::new();
        let mut session = SerialSession::new(MockPortProvider::empty(), test_config());
        source.cancel();
        assert!(matches!(
            session.reconnect(&source.token()),
            Err(SessionError::Cancelled)
        ));
    }

    #[test]
    fn test_drop_releases_transport() {
        let transport = MockTransport::new();
        let (mut session, _) = session_with(&transport);
        session.connect().unwrap();
        drop(session);
        assert!(transport.is_closed());
    }
}
