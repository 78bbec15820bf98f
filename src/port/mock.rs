//! Mock serial backend for testing.
//!
//! `MockBackend` plays the host serial subsystem: it decides which ports are
//! enumerable, which opens fail and what the permission probe answers.
//! `MockSerialPort` is the test's view of one device; it shares state with
//! the transport the connection manager opened, so a test can push arrivals,
//! inject link failures and inspect what was written or signalled.

use super::error::PortError;
use super::traits::{
    FrameSettings, OpenedPort, SerialBackend, SerialTransport, TransportSignal,
};
use crate::registry::PortDescriptor;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One change of the break condition, as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakChange {
    /// `true` when break was asserted, `false` when released.
    pub asserted: bool,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockPortState {
    /// Bytes waiting to be read.
    read_queue: VecDeque<u8>,
    /// Every write accepted by the device.
    write_log: Vec<Vec<u8>>,
    break_log: Vec<BreakChange>,
    baud_rate: Option<u32>,
    frame: Option<FrameSettings>,
    /// Number of times the baud rate was set.
    baud_changes: usize,
    flushes: usize,
    opens: usize,
    open: bool,
    /// Error returned by the next write, if any.
    fail_next_write: Option<String>,
    signal_tx: Option<mpsc::UnboundedSender<TransportSignal>>,
}

/// Test-side handle on a simulated device.
///
/// # Example
/// ```
/// use serial_link::port::{MockBackend, SerialBackend, SerialTransport};
///
/// let backend = MockBackend::new().with_port("/dev/ttyMOCK0");
/// let device = backend.device("/dev/ttyMOCK0").unwrap();
///
/// let mut opened = backend.open("/dev/ttyMOCK0", 9600).unwrap();
/// device.push_arrival(b"Hello");
///
/// assert_eq!(opened.transport.read_available().unwrap(), b"Hello");
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    name: String,
    state: Arc<Mutex<MockPortState>>,
}

impl MockSerialPort {
    /// Create a new simulated device with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue bytes and raise a data-arrived notification, like a driver
    /// receiving a burst on the wire.
    pub fn push_arrival(&self, data: &[u8]) {
        let mut state = self.state.lock();
        state.read_queue.extend(data);
        if let Some(tx) = &state.signal_tx {
            let _ = tx.send(TransportSignal::DataArrived);
        }
    }

    /// Queue bytes without raising a notification.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    /// Report an asynchronous failure of the open line.
    pub fn inject_error(&self, message: impl Into<String>) {
        let state = self.state.lock();
        if let Some(tx) = &state.signal_tx {
            let _ = tx.send(TransportSignal::Failed(message.into()));
        }
    }

    /// Make the next write fail with `message`.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.state.lock().fail_next_write = Some(message.into());
    }

    /// Get a copy of all data written to the device.
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    pub fn break_log(&self) -> Vec<BreakChange> {
        self.state.lock().break_log.clone()
    }

    /// Baud rate last applied to the device.
    pub fn baud_rate(&self) -> Option<u32> {
        self.state.lock().baud_rate
    }

    /// Frame last applied to the device.
    pub fn frame(&self) -> Option<FrameSettings> {
        self.state.lock().frame
    }

    pub fn baud_changes(&self) -> usize {
        self.state.lock().baud_changes
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }

    /// Number of times the device has been opened.
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }

    fn attach(&self) -> OpenedPort {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            state.open = true;
            state.opens += 1;
            state.signal_tx = Some(tx);
        }

        OpenedPort {
            transport: Box::new(MockTransport { port: self.clone() }),
            signals: Some(rx),
        }
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

/// The transport half handed to the connection manager.
#[derive(Debug)]
struct MockTransport {
    port: MockSerialPort,
}

impl MockTransport {
    fn record_break(&self, asserted: bool) {
        self.port.state.lock().break_log.push(BreakChange {
            asserted,
            at: Instant::now(),
        });
    }
}

impl SerialTransport for MockTransport {
    fn name(&self) -> &str {
        &self.port.name
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.port.state.lock();
        if let Some(message) = state.fail_next_write.take() {
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                message,
            )));
        }
        state.write_log.push(data.to_vec());
        Ok(data.len())
    }

    fn bytes_available(&self) -> Result<usize, PortError> {
        Ok(self.port.state.lock().read_queue.len())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, PortError> {
        let mut state = self.port.state.lock();
        Ok(state.read_queue.drain(..).collect())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        let mut state = self.port.state.lock();
        state.baud_rate = Some(baud_rate);
        state.baud_changes += 1;
        Ok(())
    }

    fn apply_frame(&mut self, frame: &FrameSettings) -> Result<(), PortError> {
        self.port.state.lock().frame = Some(*frame);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PortError> {
        self.port.state.lock().flushes += 1;
        Ok(())
    }

    fn set_break(&mut self) -> Result<(), PortError> {
        self.record_break(true);
        Ok(())
    }

    fn clear_break(&mut self) -> Result<(), PortError> {
        self.record_break(false);
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        let mut state = self.port.state.lock();
        state.open = false;
        state.signal_tx = None;
    }
}

#[derive(Debug, Default)]
struct MockBackendState {
    /// Enumerable ports, in enumeration order.
    listed: Vec<PortDescriptor>,
    devices: HashMap<String, MockSerialPort>,
    open_failures: HashMap<String, String>,
    writable: HashMap<String, bool>,
    introspection: bool,
}

/// Simulated host serial subsystem.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockBackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MockBackend::add_port`].
    pub fn with_port(self, location: &str) -> Self {
        self.add_port(location);
        self
    }

    /// Make `location` enumerable and openable, returning its device handle.
    pub fn add_port(&self, location: &str) -> MockSerialPort {
        let mut state = self.state.lock();
        if !state.listed.iter().any(|p| p.system_location == location) {
            state.listed.push(PortDescriptor::new(location));
        }
        state
            .devices
            .entry(location.to_string())
            .or_insert_with(|| MockSerialPort::new(location))
            .clone()
    }

    /// Stop enumerating `location`. An already open line stays open.
    pub fn remove_port(&self, location: &str) {
        self.state
            .lock()
            .listed
            .retain(|p| p.system_location != location);
    }

    pub fn device(&self, location: &str) -> Option<MockSerialPort> {
        self.state.lock().devices.get(location).cloned()
    }

    /// Make every open of `location` fail with `reason`.
    pub fn fail_open(&self, location: &str, reason: impl Into<String>) {
        self.state
            .lock()
            .open_failures
            .insert(location.to_string(), reason.into());
    }

    /// Answer the permission probe for `location`.
    pub fn set_writable(&self, location: &str, writable: bool) {
        self.state
            .lock()
            .writable
            .insert(location.to_string(), writable);
    }

    /// Turn the permission-introspection capability on or off.
    pub fn set_permission_introspection(&self, enabled: bool) {
        self.state.lock().introspection = enabled;
    }
}

impl SerialBackend for MockBackend {
    fn available_ports(&self) -> Result<Vec<PortDescriptor>, PortError> {
        Ok(self.state.lock().listed.clone())
    }

    fn open(&self, port_name: &str, _baud_rate: u32) -> Result<OpenedPort, PortError> {
        let state = self.state.lock();
        if let Some(reason) = state.open_failures.get(port_name) {
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                reason.clone(),
            )));
        }
        let device = state
            .devices
            .get(port_name)
            .ok_or_else(|| PortError::not_found(port_name))?;
        Ok(device.attach())
    }

    fn permission_introspection(&self) -> bool {
        self.state.lock().introspection
    }

    fn is_writable(&self, path: &Path) -> Option<bool> {
        let key = path.to_string_lossy();
        self.state.lock().writable.get(key.as_ref()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_arrival_and_read() {
        let backend = MockBackend::new().with_port("MOCK0");
        let device = backend.device("MOCK0").unwrap();
        let mut opened = backend.open("MOCK0", 9600).unwrap();
        let mut signals = opened.signals.take().unwrap();

        device.push_arrival(b"Hello");

        assert_eq!(signals.try_recv().unwrap(), TransportSignal::DataArrived);
        assert_eq!(opened.transport.bytes_available().unwrap(), 5);
        assert_eq!(opened.transport.read_available().unwrap(), b"Hello");
        assert_eq!(device.available_bytes(), 0);
    }

    #[test]
    fn test_write_logging() {
        let backend = MockBackend::new().with_port("MOCK0");
        let device = backend.device("MOCK0").unwrap();
        let mut opened = backend.open("MOCK0", 9600).unwrap();

        opened.transport.write_bytes(b"Test1").unwrap();
        opened.transport.write_bytes(b"Test2").unwrap();

        let log = device.write_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], b"Test1");
        assert_eq!(log[1], b"Test2");
    }

    #[test]
    fn test_fail_next_write() {
        let backend = MockBackend::new().with_port("MOCK0");
        let device = backend.device("MOCK0").unwrap();
        let mut opened = backend.open("MOCK0", 9600).unwrap();

        device.fail_next_write("cable pulled");
        assert!(opened.transport.write_bytes(b"x").is_err());
        assert_eq!(opened.transport.write_bytes(b"y").unwrap(), 1);
    }

    #[test]
    fn test_drop_closes_device() {
        let backend = MockBackend::new().with_port("MOCK0");
        let device = backend.device("MOCK0").unwrap();

        let opened = backend.open("MOCK0", 9600).unwrap();
        assert!(device.is_open());
        drop(opened);
        assert!(!device.is_open());
        assert_eq!(device.opens(), 1);
    }

    #[test]
    fn test_inject_error_signals_failure() {
        let backend = MockBackend::new().with_port("MOCK0");
        let device = backend.device("MOCK0").unwrap();
        let mut opened = backend.open("MOCK0", 9600).unwrap();
        let mut signals = opened.signals.take().unwrap();

        device.inject_error("device removed");
        assert_eq!(
            signals.try_recv().unwrap(),
            TransportSignal::Failed("device removed".to_string())
        );
    }

    #[test]
    fn test_open_failure_and_unknown_port() {
        let backend = MockBackend::new().with_port("MOCK0");
        backend.fail_open("MOCK0", "busy");

        match backend.open("MOCK0", 9600) {
            Err(PortError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied),
            other => panic!("Expected Io error, got: {:?}", other),
        }
        assert!(matches!(
            backend.open("MOCK1", 9600),
            Err(PortError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_port_keeps_device() {
        let backend = MockBackend::new().with_port("MOCK0").with_port("MOCK1");
        backend.remove_port("MOCK0");

        let listed = backend.available_ports().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].system_location, "MOCK1");
        assert!(backend.device("MOCK0").is_some());
    }

    #[test]
    fn test_permission_probe() {
        let backend = MockBackend::new().with_port("/dev/ttyMOCK0");
        assert!(!backend.permission_introspection());
        assert_eq!(backend.is_writable(Path::new("/dev/ttyMOCK0")), None);

        backend.set_permission_introspection(true);
        backend.set_writable("/dev/ttyMOCK0", false);
        assert!(backend.permission_introspection());
        assert_eq!(backend.is_writable(Path::new("/dev/ttyMOCK0")), Some(false));
    }
}
