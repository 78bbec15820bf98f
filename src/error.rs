//! Connection-level errors.
//!
//! Every variant except [`LinkError::ManagerClosed`] is also published as an
//! [`ErrorOccurred`](crate::events::SerialEvent::ErrorOccurred) event, so
//! observers see failures even when the caller ignores the returned `Result`.

use serde::Serialize;
use thiserror::Error;

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Requested port is not currently enumerable.
    InvalidPort,
    /// Port path exists but the current user cannot write it.
    NotWritable,
    /// The OS refused to open or configure the port.
    OpenFailed,
    /// The line failed after a successful open.
    TransportError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Invalid serial port {0}")]
    InvalidPort(String),

    #[error("Serial port {0} is not writable by the current user")]
    NotWritable(String),

    #[error("Failed to open serial port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Serial transport error: {0}")]
    TransportError(String),

    /// The manager task has stopped; no further commands are accepted.
    #[error("Serial manager has shut down")]
    ManagerClosed,
}

impl LinkError {
    pub fn open_failed(port: impl Into<String>, reason: impl ToString) -> Self {
        Self::OpenFailed {
            port: port.into(),
            reason: reason.to_string(),
        }
    }

    /// Event category, or `None` for errors that are never published.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidPort(_) => Some(ErrorKind::InvalidPort),
            Self::NotWritable(_) => Some(ErrorKind::NotWritable),
            Self::OpenFailed { .. } => Some(ErrorKind::OpenFailed),
            Self::TransportError(_) => Some(ErrorKind::TransportError),
            Self::ManagerClosed => None,
        }
    }
}
