//! Byte-Stream Transport
//!
//! The session only needs blocking `write`/`read` with per-call timeouts.
//! [`SerialPortProvider`] backs that with real serial ports; the mock pair
//! replays scripted ECU responses (after echoing the request, like the
//! K-line adapter does) so the session can be exercised without hardware.

use crate::error::SessionError;
use crate::target::LinkSettings;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// An open, exclusive byte stream to the vehicle
pub trait Transport: Send {
    /// Write all bytes, failing if they cannot be sent within `timeout`
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()>;

    /// Read up to `buf.len()` bytes. Returns `Ok(0)` when nothing arrived
    /// within `timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Release the underlying handle. Further I/O fails.
    fn close(&mut self);
}

/// A serial interface discovered by a [`PortProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: Option<String>,
}

impl PortInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Enumerates and opens serial interfaces
pub trait PortProvider: Send {
    fn available(&self) -> Vec<PortInfo>;

    /// Whether the host has granted access to `port`
    fn has_permission(&self, port: &PortInfo) -> bool;

    /// Ask the host for access. The grant arrives out-of-band.
    fn request_permission(&mut self, port: &PortInfo);

    fn open(
        &mut self,
        port: &PortInfo,
        settings: &LinkSettings,
    ) -> Result<Box<dyn Transport>, SessionError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Serial ports
// ============================================================================

/// Real serial ports, opened in blocking mode
#[derive(Debug, Default)]
pub struct SerialPortProvider {
    /// Only this port is offered when set
    port_name: Option<String>,
}

impl SerialPortProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict enumeration to a single named port
    pub fn with_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: Some(port_name.into()),
        }
    }
}

impl PortProvider for SerialPortProvider {
    fn available(&self) -> Vec<PortInfo> {
        if let Some(name) = &self.port_name {
            return vec![PortInfo::new(name.clone())];
        }

        match tokio_serial::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|port| {
                    let description = match port.port_type {
                        tokio_serial::SerialPortType::UsbPort(usb) => usb.product,
                        _ => None,
                    };
                    PortInfo {
                        name: port.port_name,
                        description,
                    }
                })
                .collect(),
            Err(e) => {
                debug!("Serial port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    fn has_permission(&self, _port: &PortInfo) -> bool {
        true
    }

    fn request_permission(&mut self, _port: &PortInfo) {}

    fn open(
        &mut self,
        port: &PortInfo,
        settings: &LinkSettings,
    ) -> Result<Box<dyn Transport>, SessionError> {
        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let stop_bits = match settings.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let serial = tokio_serial::new(&port.name, settings.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open()
            .map_err(|e| SessionError::Open {
                port: port.name.clone(),
                reason: e.to_string(),
            })?;

        info!(
            "Opened {} at {} baud {}N{}",
            port.name, settings.baud_rate, settings.data_bits, settings.stop_bits
        );
        Ok(Box::new(SerialTransport {
            name: port.name.clone(),
            port: Some(serial),
        }))
    }
}

struct SerialTransport {
    name: String,
    port: Option<Box<dyn tokio_serial::SerialPort>>,
}

impl SerialTransport {
    fn port(&mut self) -> io::Result<&mut Box<dyn tokio_serial::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed {}", self.name);
        }
    }
}

// ============================================================================
// Mocks
// ============================================================================

#[derive(Debug)]
struct MockLine {
    echo: bool,
    fail_writes: bool,
    chunk_size: Option<usize>,
    closed: bool,
    responses: VecDeque<Vec<u8>>,
    pending: VecDeque<u8>,
    written: Vec<Vec<u8>>,
}

/// In-memory transport that echoes each write and then queues the next
/// scripted response.
///
/// Clones share the same line, so a test can keep one handle for
/// inspection while the session owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    line: Arc<Mutex<MockLine>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            line: Arc::new(Mutex::new(MockLine {
                echo: true,
                fail_writes: false,
                chunk_size: None,
                closed: false,
                responses: VecDeque::new(),
                pending: VecDeque::new(),
                written: Vec::new(),
            })),
        }
    }

    /// Queue the reply to the next unanswered write. An empty reply is
    /// silence.
    pub fn push_response(&self, bytes: impl Into<Vec<u8>>) {
        lock(&self.line).responses.push_back(bytes.into());
    }

    /// Whether writes are echoed back before the reply
    pub fn set_echo(&self, echo: bool) {
        lock(&self.line).echo = echo;
    }

    /// Make every write fail as if the cable were pulled
    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.line).fail_writes = fail;
    }

    /// Deliver at most `size` bytes per read
    pub fn set_chunk_size(&self, size: Option<usize>) {
        lock(&self.line).chunk_size = size;
    }

    /// Every frame written so far
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.line).written.clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.line).written.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.line).closed
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8], _timeout: Duration) -> io::Result<()> {
        let mut line = lock(&self.line);
        if line.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed"));
        }
        if line.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock unplugged"));
        }

        line.written.push(bytes.to_vec());
        if line.echo {
            line.pending.extend(bytes.iter().copied());
        }
        if let Some(reply) = line.responses.pop_front() {
            line.pending.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        let mut line = lock(&self.line);
        if line.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed"));
        }

        let limit = line.chunk_size.unwrap_or(buf.len()).min(buf.len());
        let mut n = 0;
        while n < limit {
            match line.pending.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn close(&mut self) {
        let mut line = lock(&self.line);
        line.closed = true;
        line.pending.clear();
    }
}

#[derive(Debug)]
struct MockProviderState {
    ports: Vec<PortInfo>,
    needs_permission: bool,
    granted: bool,
    permission_requests: usize,
    fail_open: bool,
    opened: usize,
    transport: MockTransport,
}

/// Port provider that hands out a shared [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockPortProvider {
    state: Arc<Mutex<MockProviderState>>,
}

impl MockPortProvider {
    /// One port, no permission gate
    pub fn new(transport: MockTransport) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockProviderState {
                ports: vec![PortInfo::new("mock0")],
                needs_permission: false,
                granted: false,
                permission_requests: 0,
                fail_open: false,
                opened: 0,
                transport,
            })),
        }
    }

    /// A provider with no ports at all
    pub fn empty() -> Self {
        let provider = Self::new(MockTransport::new());
        lock(&provider.state).ports.clear();
        provider
    }

    /// Require a permission grant before opening
    pub fn requiring_permission(self) -> Self {
        lock(&self.state).needs_permission = true;
        self
    }

    /// Simulate the host granting access out-of-band
    pub fn grant_permission(&self) {
        lock(&self.state).granted = true;
    }

    pub fn set_fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn permission_requests(&self) -> usize {
        lock(&self.state).permission_requests
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opened
    }

    pub fn transport(&self) -> MockTransport {
        lock(&self.state).transport.clone()
    }
}

impl PortProvider for MockPortProvider {
    fn available(&self) -> Vec<PortInfo> {
        lock(&self.state).ports.clone()
    }

    fn has_permission(&self, _port: &PortInfo) -> bool {
        let state = lock(&self.state);
        !state.needs_permission || state.granted
    }

    fn request_permission(&mut self, _port: &PortInfo) {
        lock(&self.state).permission_requests += 1;
    }

    fn open(
        &mut self,
        port: &PortInfo,
        _settings: &LinkSettings,
    ) -> Result<Box<dyn Transport>, SessionError> {
        let mut state = lock(&self.state);
        if state.fail_open {
            return Err(SessionError::Open {
                port: port.name.clone(),
                reason: "mock open failure".to_string(),
            });
        }
        state.opened += 1;

        let transport = state.transport.clone();
        // A reopened mock line starts clean
        {
            let mut line = lock(&transport.line);
            line.closed = false;
            line.pending.clear();
        }
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(10);

    #[test]
    fn test_mock_echoes_then_replies() {
        let mut transport = MockTransport::new();
        transport.push_response(vec![0xAA, 0xBB]);
        transport.write(&[0x01, 0x02], T).unwrap();

        let mut buf = [0u8; 8];
        let n = transport.read(&mut buf, T).unwrap();
        assert_eq!(&buf[..n], &[0x01, 0x02, 0xAA, 0xBB]);
        assert_eq!(transport.read(&mut buf, T).unwrap(), 0);
        assert_eq!(transport.written(), vec![vec![0x01, 0x02]]);
    }

    #[test]
    fn test_mock_chunked_reads() {
        let mut transport = MockTransport::new();
        transport.set_echo(false);
        transport.set_chunk_size(Some(2));
        transport.push_response(vec![1, 2, 3]);
        transport.write(&[0], T).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(transport.read(&mut buf, T).unwrap(), 2);
        assert_eq!(transport.read(&mut buf, T).unwrap(), 1);
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn test_mock_write_failure_and_close() {
        let mut transport = MockTransport::new();
        transport.set_fail_writes(true);
        assert!(transport.write(&[0], T).is_err());

        transport.set_fail_writes(false);
        transport.close();
        assert!(transport.is_closed());
        assert!(transport.write(&[0], T).is_err());
    }

    #[test]
    fn test_mock_provider_permission() {
        let mut provider = MockPortProvider::new(MockTransport::new()).requiring_permission();
        let port = provider.available()[0].clone();
        assert!(!provider.has_permission(&port));

        provider.request_permission(&port);
        assert_eq!(provider.permission_requests(), 1);

        provider.grant_permission();
        assert!(provider.has_permission(&port));
        assert!(provider.open(&port, &LinkSettings::default()).is_ok());
        assert_eq!(provider.open_count(), 1);
    }

    #[test]
    fn test_mock_provider_reopen_clears_line() {
        let transport = MockTransport::new();
        let mut provider = MockPortProvider::new(transport.clone());
        let port = provider.available()[0].clone();

        let mut first = provider.open(&port, &LinkSettings::default()).unwrap();
        first.close();
        assert!(transport.is_closed());

        let _second = provider.open(&port, &LinkSettings::default()).unwrap();
        assert!(!transport.is_closed());
    }

    #[test]
    fn test_named_serial_provider() {
        let provider = SerialPortProvider::with_port("/dev/ttyUSB0");
        assert_eq!(provider.available(), vec![PortInfo::new("/dev/ttyUSB0")]);
        assert!(provider.has_permission(&PortInfo::new("/dev/ttyUSB0")));
    }
}
