//! OS serial backend.
//!
//! Wraps the `serialport` crate. `serialport` has no arrival callback, so each
//! open line gets a watcher thread holding a cloned descriptor; it samples the
//! driver's input queue and raises [`TransportSignal::DataArrived`] while bytes
//! are waiting, or [`TransportSignal::Failed`] once the descriptor stops
//! answering. The watcher is stopped and joined before the line closes, so a
//! closed port can be reopened at once.

use super::error::PortError;
use super::traits::{
    FrameSettings, OpenedPort, SerialBackend, SerialTransport, TransportSignal, TransportSignals,
};
use crate::registry::PortDescriptor;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Read timeout handed to the driver. Reads only happen when bytes are queued.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// How often the watcher thread samples the input queue.
const WATCH_INTERVAL: Duration = Duration::from_millis(5);

/// An open OS serial line.
pub struct SystemSerialPort {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    watcher: Option<Watcher>,
}

/// The input queue watcher thread and its stop flag.
struct Watcher {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Watcher {
    /// Stop the thread and wait for it to release its descriptor.
    fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        if self.thread.join().is_err() {
            warn!("input queue watcher panicked");
        }
    }
}

impl SystemSerialPort {
    /// Open `port_name` read/write at `baud_rate`.
    ///
    /// # Example
    /// ```no_run
    /// use serial_link::port::SystemSerialPort;
    ///
    /// let port = SystemSerialPort::open("/dev/ttyUSB0", 115_200)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, PortError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| PortError::from_open(port_name, e))?;

        Ok(Self {
            port,
            name: port_name.to_string(),
            watcher: None,
        })
    }

    /// Start the watcher thread for this line, replacing any earlier one.
    ///
    /// The thread exits once the returned receiver is dropped, and is joined
    /// when the port is dropped.
    pub fn watch(&mut self) -> Result<TransportSignals, PortError> {
        if let Some(previous) = self.watcher.take() {
            previous.shutdown();
        }
        let sampler = self.port.try_clone()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));

        let thread = thread::Builder::new()
            .name(format!("serial-watch:{}", self.name))
            .spawn({
                let stop = Arc::clone(&stop);
                move || watch_input_queue(sampler, tx, stop)
            })?;

        self.watcher = Some(Watcher { stop, thread });
        Ok(rx)
    }

    /// Get a reference to the underlying serialport implementation.
    pub fn as_raw(&self) -> &dyn serialport::SerialPort {
        &*self.port
    }
}

fn watch_input_queue(
    sampler: Box<dyn serialport::SerialPort>,
    tx: mpsc::UnboundedSender<TransportSignal>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Acquire) && !tx.is_closed() {
        match sampler.bytes_to_read() {
            Ok(0) => {}
            Ok(_) => {
                if tx.send(TransportSignal::DataArrived).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(TransportSignal::Failed(e.to_string()));
                break;
            }
        }
        thread::sleep(WATCH_INTERVAL);
    }
    trace!("input queue watcher stopped");
}

impl SerialTransport for SystemSerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.port.write(data).map_err(PortError::Io)
    }

    fn bytes_available(&self) -> Result<usize, PortError> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(PortError::Serial)
    }

    fn read_available(&mut self) -> Result<Vec<u8>, PortError> {
        let queued = self.bytes_available()?;
        if queued == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; queued];
        let n = match self.port.read(&mut buffer) {
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(PortError::Io(e)),
        };
        buffer.truncate(n);
        Ok(buffer)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        self.port.set_baud_rate(baud_rate)?;
        Ok(())
    }

    fn apply_frame(&mut self, frame: &FrameSettings) -> Result<(), PortError> {
        self.port.set_data_bits(frame.data_bits.into())?;
        self.port.set_parity(frame.parity.into())?;
        self.port.set_stop_bits(frame.stop_bits.into())?;
        self.port.set_flow_control(frame.flow_control.into())?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PortError> {
        self.port.flush().map_err(PortError::Io)
    }

    fn set_break(&mut self) -> Result<(), PortError> {
        self.port.set_break().map_err(PortError::Serial)
    }

    fn clear_break(&mut self) -> Result<(), PortError> {
        self.port.clear_break().map_err(PortError::Serial)
    }
}

impl Drop for SystemSerialPort {
    fn drop(&mut self) {
        // The cloned descriptor shares the exclusive lock on the device.
        if let Some(watcher) = self.watcher.take() {
            watcher.shutdown();
        }
    }
}

impl std::fmt::Debug for SystemSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSerialPort")
            .field("name", &self.name)
            .field("baud_rate", &self.port.baud_rate().ok())
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

/// The host's serial subsystem, via `serialport`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl SerialBackend for SystemBackend {
    fn available_ports(&self) -> Result<Vec<PortDescriptor>, PortError> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(PortDescriptor::from).collect())
    }

    fn open(&self, port_name: &str, baud_rate: u32) -> Result<OpenedPort, PortError> {
        let mut port = SystemSerialPort::open(port_name, baud_rate)?;
        let signals = port.watch()?;
        debug!(port = port_name, baud_rate, "opened OS serial port");

        Ok(OpenedPort {
            transport: Box::new(port),
            signals: Some(signals),
        })
    }

    fn permission_introspection(&self) -> bool {
        cfg!(unix)
    }

    fn is_writable(&self, path: &Path) -> Option<bool> {
        writable(path)
    }
}

#[cfg(unix)]
fn writable(path: &Path) -> Option<bool> {
    use nix::unistd::{access, AccessFlags};

    if !path.exists() {
        return None;
    }
    Some(access(path, AccessFlags::W_OK).is_ok())
}

#[cfg(not(unix))]
fn writable(_path: &Path) -> Option<bool> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_not_found_error() {
        let result = SystemSerialPort::open("/dev/nonexistent_port_12345", 9600);

        match result {
            Err(PortError::NotFound(name)) => assert!(name.contains("nonexistent")),
            Err(PortError::Io(_)) | Err(PortError::Serial(_)) => {}
            other => panic!("Expected open failure, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_backend_open_missing_port_fails() {
        let backend = SystemBackend;
        assert!(backend.open("/dev/nonexistent_port_67890", 9600).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_writable_missing_path_is_unknown() {
        assert_eq!(writable(Path::new("/dev/nonexistent_port_12345")), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_writable_temp_dir() {
        let dir = std::env::temp_dir();
        assert_eq!(writable(&dir), Some(true));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reopen_right_after_close() {
        use nix::fcntl::OFlag;
        use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};

        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).unwrap();
        grantpt(&master).unwrap();
        unlockpt(&master).unwrap();
        let slave = ptsname_r(&master).unwrap();

        for attempt in 0..10 {
            let opened = SystemBackend
                .open(&slave, 9600)
                .unwrap_or_else(|e| panic!("open #{} of {} failed: {}", attempt, slave, e));
            assert!(opened.signals.is_some());
            drop(opened);
        }
    }

    #[test]
    fn test_capability_matches_platform() {
        assert_eq!(SystemBackend.permission_introspection(), cfg!(unix));
    }
}
