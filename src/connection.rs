//! Connection state machine.
//!
//! Owns the transport handle and walks it through
//! validate → open → configure → close, reporting every outcome through the
//! [`EventNotifier`].

use crate::error::LinkError;
use crate::events::{EventNotifier, EventSubscription, SerialEvent};
use crate::port::{FrameSettings, SerialBackend, SerialTransport, TransportHandle, TransportSignals};
use crate::registry::{PortDescriptor, PortRegistry};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Open in progress; never observable between calls.
    Connecting,
    Connected,
}

/// A single serial connection and its lifecycle.
#[derive(Debug)]
pub struct SerialConnection {
    registry: PortRegistry,
    handle: TransportHandle,
    state: ConnectionState,
    notifier: EventNotifier,
    /// Frame applied after every fresh open
    frame: FrameSettings,
    check_writable: bool,
}

impl SerialConnection {
    pub fn new(
        backend: Arc<dyn SerialBackend>,
        notifier: EventNotifier,
        frame: FrameSettings,
        check_writable: bool,
    ) -> Self {
        Self {
            registry: PortRegistry::new(backend),
            handle: TransportHandle::new(),
            state: ConnectionState::Disconnected,
            notifier,
            frame,
            check_writable,
        }
    }

    pub fn list_ports(&self) -> Vec<PortDescriptor> {
        self.registry.list_ports()
    }

    /// Whether `port` is enumerable right now.
    pub fn validate(&self, port: &str) -> bool {
        self.registry.contains(port)
    }

    /// Connect to `port` at `baud_rate`.
    ///
    /// Connecting while already connected skips open and configuration and
    /// only re-announces the status. Failures are both returned and published.
    pub fn connect(&mut self, port: &str, baud_rate: u32) -> Result<(), LinkError> {
        if !self.validate(port) {
            return Err(self.report(LinkError::InvalidPort(port.to_string())));
        }

        if self.handle.is_open() {
            debug!(port = %self.handle.port_name(), "already connected");
        } else {
            self.state = ConnectionState::Connecting;
            if let Err(e) = self.open_and_configure(port, baud_rate) {
                self.state = ConnectionState::Disconnected;
                return Err(self.report(e));
            }
            info!(port, baud_rate, "serial connected");
        }

        self.state = ConnectionState::Connected;
        self.notifier
            .emit(SerialEvent::StatusChanged { connected: true });
        Ok(())
    }

    fn open_and_configure(&mut self, port: &str, baud_rate: u32) -> Result<(), LinkError> {
        if self.check_writable && self.registry.backend().permission_introspection() {
            if let Some(false) = self.registry.backend().is_writable(Path::new(port)) {
                return Err(LinkError::NotWritable(port.to_string()));
            }
        }

        self.handle.set_port_name(port);
        self.handle
            .open(self.registry.backend())
            .map_err(|e| LinkError::open_failed(port, e))?;

        let configured = self
            .handle
            .set_baud_rate(baud_rate)
            .and_then(|_| self.handle.apply_frame(self.frame));
        if let Err(e) = configured {
            self.handle.close();
            return Err(LinkError::open_failed(port, e));
        }
        Ok(())
    }

    /// Flush and close the line if open. Always announces the disconnected
    /// status.
    pub fn disconnect(&mut self) {
        if self.handle.close() {
            info!(port = %self.handle.port_name(), "serial disconnected");
        }
        self.state = ConnectionState::Disconnected;
        self.notifier
            .emit(SerialEvent::StatusChanged { connected: false });
    }

    /// Disconnect if connected, otherwise connect. Returns the new
    /// connected state.
    pub fn toggle(&mut self, port: &str, baud_rate: u32) -> Result<bool, LinkError> {
        if self.is_connected() {
            self.disconnect();
            Ok(false)
        } else {
            self.connect(port, baud_rate).map(|_| true)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_open()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status_text(&self) -> String {
        if self.is_connected() {
            format!("Serial connected to {}", self.handle.port_name())
        } else {
            "Serial not connected".to_string()
        }
    }

    /// Port name last selected, connected or not.
    pub fn port_name(&self) -> &str {
        self.handle.port_name()
    }

    pub fn baud_rate(&self) -> u32 {
        self.handle.baud_rate()
    }

    /// Report a failure of the open line and force a disconnect.
    pub fn handle_transport_error(&mut self, message: impl Into<String>) {
        self.report(LinkError::TransportError(message.into()));
        self.disconnect();
    }

    pub fn transport_mut(&mut self) -> Option<&mut (dyn SerialTransport + 'static)> {
        self.handle.transport_mut()
    }

    pub fn signals_mut(&mut self) -> Option<&mut TransportSignals> {
        self.handle.signals_mut()
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.notifier.subscribe()
    }

    fn report(&self, err: LinkError) -> LinkError {
        warn!(error = %err, "serial error");
        if let Some(event) = SerialEvent::from_error(&err) {
            self.notifier.emit(event);
        }
        err
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.handle.close();
    }
}
