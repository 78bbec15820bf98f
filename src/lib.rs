//! Serial Link Library
//!
//! Owns one serial line, walks it through discover → validate → open →
//! configure → read/write → close, and tells observers what happened.
//!
//! # Modules
//!
//! - `config`: TOML configuration with environment overrides
//! - `error`: Connection-level errors and their event categories
//! - `events`: Broadcast of status, error and packet events
//! - `port`: Backend/transport traits, the OS backend and a mock backend
//! - `registry`: Port enumeration
//! - `connection`: Connect/disconnect state machine
//! - `scheduler`: Edge or interval reads, writes and the auto-break pulse
//! - `manager`: The task that owns a connection, and its cloneable handle
//! - `logging`: Tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use serial_link::{ManagerOptions, SerialEvent, SerialManager, SystemBackend};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), serial_link::LinkError> {
//! let link = SerialManager::spawn(ManagerOptions::default(), Arc::new(SystemBackend));
//! let mut events = link.subscribe();
//!
//! link.connect("/dev/ttyUSB0", 115_200).await?;
//! link.write(b"AT\r\n".to_vec()).await;
//!
//! while let Some(event) = events.recv().await {
//!     if let SerialEvent::PacketReady { bytes } = event {
//!         println!("{}", String::from_utf8_lossy(&bytes));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod port;
pub mod registry;
pub mod scheduler;

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
pub use connection::{ConnectionState, SerialConnection};
pub use error::{ErrorKind, LinkError};
pub use events::{EventNotifier, EventSubscription, SerialEvent};
pub use manager::{ManagerOptions, SerialHandle, SerialManager};
pub use port::{
    DataBits, FlowControl, FrameSettings, MockBackend, MockSerialPort, Parity, PortError,
    SerialBackend, SerialTransport, StopBits, SystemBackend,
};
pub use registry::{PortDescriptor, PortKind, PortRegistry};
pub use scheduler::{BreakTiming, IoScheduler, SampleTrigger};
