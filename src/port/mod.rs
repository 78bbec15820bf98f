//! Port abstraction layer for serial communication.
//!
//! Provides the backend and transport traits, the OS implementation, a mock
//! implementation for tests, and the transport handle a connection owns.

pub mod error;
pub mod handle;
pub mod mock;
pub mod system;
pub mod traits;

pub use error::PortError;
pub use handle::TransportHandle;
pub use mock::{BreakChange, MockBackend, MockSerialPort};
pub use system::{SystemBackend, SystemSerialPort};
pub use traits::*;
