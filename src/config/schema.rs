//! Configuration schema.
//!
//! Every section has serde defaults, so a file only needs the keys it
//! changes.

use super::error::{ConfigError, ConfigResult};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::port::FrameSettings;
use crate::scheduler::{BreakTiming, SampleTrigger};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_BREAK_SETTLE_MS: u64 = 10;
pub const DEFAULT_BREAK_HOLD_MS: u64 = 1;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub sampling: SamplingConfig,
    pub auto_break: AutoBreakConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::invalid(
                "serial.default_baud",
                "must be greater than zero",
            ));
        }
        if self.serial.event_capacity == 0 {
            return Err(ConfigError::invalid(
                "serial.event_capacity",
                "must be greater than zero",
            ));
        }
        self.sampling.trigger()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port used when the caller does not name one
    pub default_port: Option<String>,
    pub default_baud: u32,
    /// Refuse to open paths the current user cannot write, where the host
    /// can tell
    pub check_writable: bool,
    /// Events buffered per subscriber before the oldest are dropped
    pub event_capacity: usize,
    /// Data bits, parity, stop bits and flow control applied on connect
    pub frame: FrameSettings,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_port: None,
            default_baud: DEFAULT_BAUD_RATE,
            check_writable: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            frame: FrameSettings::default(),
        }
    }
}

/// How incoming data is picked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Drain whenever the transport reports new bytes
    #[default]
    Edge,
    /// Drain on a fixed clock
    Interval,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub mode: SamplingMode,
    /// Interval period in milliseconds
    pub period_ms: Option<u64>,
    /// Interval rate in Hz, converted to `1000 / hz` milliseconds
    pub frequency_hz: Option<u32>,
}

impl SamplingConfig {
    pub fn trigger(&self) -> ConfigResult<SampleTrigger> {
        match self.mode {
            SamplingMode::Edge => Ok(SampleTrigger::Edge),
            SamplingMode::Interval => match (self.period_ms, self.frequency_hz) {
                (Some(_), Some(_)) => Err(ConfigError::invalid(
                    "sampling",
                    "set either period_ms or frequency_hz, not both",
                )),
                (Some(0), None) => Err(ConfigError::invalid(
                    "sampling.period_ms",
                    "must be greater than zero",
                )),
                (Some(ms), None) => Ok(SampleTrigger::Interval(Duration::from_millis(ms))),
                (None, Some(hz)) => SampleTrigger::from_frequency_hz(hz).ok_or_else(|| {
                    ConfigError::invalid("sampling.frequency_hz", "must be between 1 and 1000")
                }),
                (None, None) => Err(ConfigError::invalid(
                    "sampling",
                    "interval mode needs period_ms or frequency_hz",
                )),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBreakConfig {
    /// Emit a break pulse after every write
    pub enabled: bool,
    /// Delay between the write completing and break being asserted
    pub settle_ms: u64,
    /// How long break is held
    pub hold_ms: u64,
}

impl Default for AutoBreakConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            settle_ms: DEFAULT_BREAK_SETTLE_MS,
            hold_ms: DEFAULT_BREAK_HOLD_MS,
        }
    }
}

impl AutoBreakConfig {
    pub fn timing(&self) -> BreakTiming {
        BreakTiming {
            settle: Duration::from_millis(self.settle_ms),
            hold: Duration::from_millis(self.hold_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset: "trace", "debug", "info", "warn", "error"
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    /// Multi-line with colors
    #[default]
    Pretty,
    Compact,
}
