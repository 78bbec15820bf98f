//! Shared test utilities for serial-link integration tests.
//!
//! Provides a mock-backed manager harness and small event helpers.

#![allow(dead_code)]

use serial_link::port::{MockBackend, MockSerialPort};
use serial_link::{
    EventNotifier, EventSubscription, FrameSettings, ManagerOptions, SerialConnection,
    SerialEvent, SerialHandle, SerialManager,
};
use std::sync::Arc;
use std::time::Duration;

/// How long a test waits for an event that should arrive.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// A running manager over a mock backend, subscribed from the start.
pub struct Harness {
    pub backend: MockBackend,
    pub link: SerialHandle,
    pub events: EventSubscription,
}

impl Harness {
    /// Spawn a manager that can see `ports`.
    pub fn spawn(ports: &[&str], options: ManagerOptions) -> Self {
        let backend = MockBackend::new();
        for port in ports {
            backend.add_port(port);
        }
        let link = SerialManager::spawn(options, Arc::new(backend.clone()));
        let events = link.subscribe();
        Self {
            backend,
            link,
            events,
        }
    }

    pub fn device(&self, location: &str) -> MockSerialPort {
        self.backend
            .device(location)
            .unwrap_or_else(|| panic!("no mock device {}", location))
    }

    /// Wait until the manager has handled everything sent to it so far.
    ///
    /// The manager drains pending transport notifications before it looks at
    /// the next command, so one round trip is enough.
    pub async fn settle(&self) {
        self.link.is_connected().await.expect("manager stopped");
    }

    /// Next event, failing the test if none arrives in time.
    pub async fn next_event(&mut self) -> SerialEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Everything published and not yet consumed.
    pub fn drain_events(&mut self) -> Vec<SerialEvent> {
        self.events.drain()
    }
}

/// A connection over `backend` with default frame and the writable guard on.
pub fn connection(backend: &MockBackend) -> SerialConnection {
    SerialConnection::new(
        Arc::new(backend.clone()),
        EventNotifier::new(64),
        FrameSettings::default(),
        true,
    )
}

pub fn status(connected: bool) -> SerialEvent {
    SerialEvent::StatusChanged { connected }
}

pub fn packet(bytes: &[u8]) -> SerialEvent {
    SerialEvent::PacketReady {
        bytes: bytes.to_vec(),
    }
}
