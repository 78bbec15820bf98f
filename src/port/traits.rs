//! Core traits for serial transport abstraction.
//!
//! `SerialBackend` is the host's serial subsystem (enumerate, open, probe
//! permissions) and `SerialTransport` is one open line. Both the OS backend
//! and the mock backend implement them, so the connection manager never sees
//! which one it is driving.

use super::error::PortError;
use crate::registry::PortDescriptor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::mpsc;

/// Frame parameters applied to an open line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSettings {
    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Flow control mode.
    pub flow_control: FlowControl,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Asynchronous notification raised by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// New bytes are waiting in the input queue.
    DataArrived,
    /// The line failed after opening (device removed, link dropped).
    Failed(String),
}

/// Receiving side of a transport's notifications.
pub type TransportSignals = mpsc::UnboundedReceiver<TransportSignal>;

/// A freshly opened transport together with its notification channel.
pub struct OpenedPort {
    pub transport: Box<dyn SerialTransport>,
    pub signals: Option<TransportSignals>,
}

impl std::fmt::Debug for OpenedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedPort")
            .field("transport", &self.transport)
            .field("signals", &self.signals.is_some())
            .finish()
    }
}

/// One open serial line.
///
/// Dropping the transport closes the underlying descriptor.
pub trait SerialTransport: Send + std::fmt::Debug {
    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    /// Write bytes to the line.
    ///
    /// Returns the number of bytes accepted by the driver.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Number of bytes waiting in the input queue.
    fn bytes_available(&self) -> Result<usize, PortError>;

    /// Read everything currently in the input queue without blocking.
    fn read_available(&mut self) -> Result<Vec<u8>, PortError>;

    /// Change the line speed.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError>;

    /// Apply data bits, parity, stop bits and flow control.
    fn apply_frame(&mut self, frame: &FrameSettings) -> Result<(), PortError>;

    /// Block until pending outbound bytes have been handed to the driver.
    fn flush(&mut self) -> Result<(), PortError>;

    /// Assert the break condition on the TX line.
    fn set_break(&mut self) -> Result<(), PortError>;

    /// Release the break condition.
    fn clear_break(&mut self) -> Result<(), PortError>;
}

/// The host serial subsystem.
pub trait SerialBackend: Send + Sync + std::fmt::Debug {
    /// Enumerate the endpoints currently present.
    fn available_ports(&self) -> Result<Vec<PortDescriptor>, PortError>;

    /// Open `port_name` for simultaneous read and write.
    fn open(&self, port_name: &str, baud_rate: u32) -> Result<OpenedPort, PortError>;

    /// Whether this host can answer [`SerialBackend::is_writable`].
    fn permission_introspection(&self) -> bool {
        false
    }

    /// `Some(false)` when `path` exists and the current user cannot write it,
    /// `None` when the path does not exist or the question cannot be answered.
    fn is_writable(&self, _path: &Path) -> Option<bool> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_frame() {
        let frame = FrameSettings::default();
        assert_eq!(frame.data_bits, DataBits::Eight);
        assert_eq!(frame.flow_control, FlowControl::None);
        assert_eq!(frame.parity, Parity::None);
        assert_eq!(frame.stop_bits, StopBits::One);
    }

    #[test]
    fn test_data_bits_conversion() {
        let serialport_bits: serialport::DataBits = DataBits::Seven.into();
        assert_eq!(serialport_bits, serialport::DataBits::Seven);
    }

    #[test]
    fn test_flow_control_conversion() {
        let serialport_flow: serialport::FlowControl = FlowControl::Hardware.into();
        assert_eq!(serialport_flow, serialport::FlowControl::Hardware);
    }

    #[test]
    fn test_parity_conversion() {
        let serialport_parity: serialport::Parity = Parity::Even.into();
        assert_eq!(serialport_parity, serialport::Parity::Even);
    }

    #[test]
    fn test_stop_bits_conversion() {
        let serialport_stop_bits: serialport::StopBits = StopBits::Two.into();
        assert_eq!(serialport_stop_bits, serialport::StopBits::Two);
    }

    #[test]
    fn test_frame_partial_toml() {
        let frame: FrameSettings = toml::from_str("parity = \"odd\"").unwrap();
        assert_eq!(frame.parity, Parity::Odd);
        assert_eq!(frame.data_bits, DataBits::Eight);
    }
}
