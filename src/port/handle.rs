//! The transport handle owned by a connection.
//!
//! Exists for the whole life of the connection and is opened and closed
//! repeatedly. Baud rate and frame changes are refused while closed, and
//! closing a closed handle is a no-op.

use super::error::PortError;
use super::traits::{FrameSettings, SerialBackend, SerialTransport, TransportSignals};
use crate::config::DEFAULT_BAUD_RATE;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct TransportHandle {
    port_name: String,
    baud_rate: u32,
    frame: FrameSettings,
    transport: Option<Box<dyn SerialTransport>>,
    signals: Option<TransportSignals>,
}

impl Default for TransportHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportHandle {
    /// A closed handle with no port selected.
    pub fn new() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            frame: FrameSettings::default(),
            transport: None,
            signals: None,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn set_port_name(&mut self, port_name: &str) {
        self.port_name = port_name.to_string();
    }

    /// Baud rate last applied to the line.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Frame last applied to the line.
    pub fn frame(&self) -> FrameSettings {
        self.frame
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Open the selected port read/write through `backend`.
    ///
    /// The line is opened at the currently stored baud rate; callers apply the
    /// requested settings afterwards with [`TransportHandle::set_baud_rate`]
    /// and [`TransportHandle::apply_frame`].
    pub fn open(&mut self, backend: &dyn SerialBackend) -> Result<(), PortError> {
        if self.is_open() {
            return Ok(());
        }
        let opened = backend.open(&self.port_name, self.baud_rate)?;
        self.transport = Some(opened.transport);
        self.signals = opened.signals;
        Ok(())
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        let transport = self.transport.as_mut().ok_or(PortError::NotOpen)?;
        transport.set_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    pub fn apply_frame(&mut self, frame: FrameSettings) -> Result<(), PortError> {
        let transport = self.transport.as_mut().ok_or(PortError::NotOpen)?;
        transport.apply_frame(&frame)?;
        self.frame = frame;
        Ok(())
    }

    /// Flush pending output and close. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        let Some(mut transport) = self.transport.take() else {
            return false;
        };
        if let Err(e) = transport.flush() {
            warn!(port = %self.port_name, error = %e, "flush before close failed");
        }
        self.signals = None;
        drop(transport);
        debug!(port = %self.port_name, "transport closed");
        true
    }

    /// The open line, if any.
    pub fn transport_mut(&mut self) -> Option<&mut (dyn SerialTransport + 'static)> {
        self.transport.as_deref_mut()
    }

    /// Notification channel of the open line, if it has one.
    pub fn signals_mut(&mut self) -> Option<&mut TransportSignals> {
        self.signals.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{MockBackend, Parity};

    #[test]
    fn test_configuration_refused_while_closed() {
        let mut handle = TransportHandle::new();
        assert!(matches!(handle.set_baud_rate(115_200), Err(PortError::NotOpen)));
        assert!(matches!(
            handle.apply_frame(FrameSettings::default()),
            Err(PortError::NotOpen)
        ));
        assert_eq!(handle.baud_rate(), DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_open_configure_close() {
        let backend = MockBackend::new().with_port("MOCK0");
        let device = backend.device("MOCK0").unwrap();
        let mut handle = TransportHandle::new();

        handle.set_port_name("MOCK0");
        handle.open(&backend).unwrap();
        handle.set_baud_rate(57_600).unwrap();
        handle
            .apply_frame(FrameSettings {
                parity: Parity::Even,
                ..FrameSettings::default()
            })
            .unwrap();

        assert!(handle.is_open());
        assert!(handle.signals_mut().is_some());
        assert_eq!(device.baud_rate(), Some(57_600));
        assert_eq!(device.frame().map(|f| f.parity), Some(Parity::Even));

        assert!(handle.close());
        assert!(!device.is_open());
        assert_eq!(device.flushes(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut handle = TransportHandle::new();
        assert!(!handle.close());
        assert!(!handle.close());
    }

    #[test]
    fn test_open_failure_leaves_handle_closed() {
        let backend = MockBackend::new();
        let mut handle = TransportHandle::new();
        handle.set_port_name("MISSING");

        assert!(handle.open(&backend).is_err());
        assert!(!handle.is_open());
        assert!(handle.transport_mut().is_none());
    }
}
