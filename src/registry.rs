//! Port discovery.
//!
//! Every call enumerates afresh; nothing is cached, because ports appear and
//! vanish between calls.

use crate::port::SerialBackend;
use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::sync::Arc;
use tracing::warn;

/// Bus a port is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

/// Snapshot of one enumerable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortDescriptor {
    /// System location, e.g. `/dev/ttyUSB0` or `COM3`.
    pub system_location: String,
    pub kind: PortKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl PortDescriptor {
    /// A descriptor with only a location.
    pub fn new(system_location: impl Into<String>) -> Self {
        Self {
            system_location: system_location.into(),
            kind: PortKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// One-line human description, e.g. `FTDI FT232R USB UART (0403:6001)`.
    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(manufacturer) = &self.manufacturer {
            parts.push(manufacturer.clone());
        }
        if let Some(product) = &self.product {
            parts.push(product.clone());
        }
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            parts.push(format!("({:04x}:{:04x})", vid, pid));
        }
        if parts.is_empty() {
            match self.kind {
                PortKind::Usb => "USB serial port".to_string(),
                PortKind::Pci => "PCI serial port".to_string(),
                PortKind::Bluetooth => "Bluetooth serial port".to_string(),
                PortKind::Unknown => "serial port".to_string(),
            }
        } else {
            parts.join(" ")
        }
    }
}

impl From<SerialPortInfo> for PortDescriptor {
    fn from(info: SerialPortInfo) -> Self {
        let mut descriptor = Self::new(info.port_name);
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                descriptor.kind = PortKind::Usb;
                descriptor.vid = Some(usb.vid);
                descriptor.pid = Some(usb.pid);
                descriptor.manufacturer = usb.manufacturer;
                descriptor.product = usb.product;
                descriptor.serial_number = usb.serial_number;
            }
            SerialPortType::PciPort => descriptor.kind = PortKind::Pci,
            SerialPortType::BluetoothPort => descriptor.kind = PortKind::Bluetooth,
            SerialPortType::Unknown => {}
        }
        descriptor
    }
}

/// Enumerates endpoints through a [`SerialBackend`].
#[derive(Debug, Clone)]
pub struct PortRegistry {
    backend: Arc<dyn SerialBackend>,
}

impl PortRegistry {
    pub fn new(backend: Arc<dyn SerialBackend>) -> Self {
        Self { backend }
    }

    /// Ports present right now. Enumeration failures yield an empty list.
    pub fn list_ports(&self) -> Vec<PortDescriptor> {
        match self.backend.available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "port enumeration failed");
                Vec::new()
            }
        }
    }

    /// Whether `location` is currently enumerable.
    pub fn contains(&self, location: &str) -> bool {
        self.list_ports()
            .iter()
            .any(|p| p.system_location == location)
    }

    pub fn backend(&self) -> &dyn SerialBackend {
        self.backend.as_ref()
    }
}
