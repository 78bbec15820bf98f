//! Configuration for serial-link.
//!
//! TOML with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! 1. `SERIAL_LINK_CONFIG` environment variable (explicit path)
//! 2. `./serial-link.toml` (current directory)
//! 3. `serial-link/config.toml` in the platform config directory
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `SERIAL_LINK_<SECTION>_<KEY>`:
//! - `SERIAL_LINK_SERIAL_DEFAULT_PORT=/dev/ttyUSB0`
//! - `SERIAL_LINK_SERIAL_DEFAULT_BAUD=115200`
//! - `SERIAL_LINK_SAMPLING_MODE=interval`
//! - `SERIAL_LINK_SAMPLING_PERIOD_MS=100` / `SERIAL_LINK_SAMPLING_FREQUENCY_HZ=10`
//! - `SERIAL_LINK_AUTO_BREAK_ENABLED=true`
//! - `SERIAL_LINK_LOGGING_LEVEL=debug`
//!
//! # Example
//!
//! ```toml
//! [serial]
//! default_port = "/dev/ttyUSB0"
//! default_baud = 115200
//!
//! [sampling]
//! mode = "interval"
//! frequency_hz = 20
//!
//! [auto_break]
//! enabled = true
//! settle_ms = 12
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{
    AutoBreakConfig, Config, LogFormat, LoggingConfig, SamplingConfig, SamplingMode, SerialConfig,
    DEFAULT_BAUD_RATE, DEFAULT_BREAK_HOLD_MS, DEFAULT_BREAK_SETTLE_MS,
};
