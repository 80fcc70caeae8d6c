//! Error types for relay board operations.

use smdt_core::error::ErrorClass;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur when driving the relay board.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Serial port could not be opened
    #[error("Failed to open relay port '{port}': {message}")]
    Open { port: String, message: String },

    /// Frame write (write + flush) did not complete in time
    #[error("Relay frame for tube {tube} not confirmed within {timeout:?}")]
    WriteTimeout { tube: u8, timeout: Duration },

    /// Frame write failed at the OS level
    #[error("Relay write for tube {tube} failed: {source}")]
    Write {
        tube: u8,
        #[source]
        source: std::io::Error,
    },

    /// Physical position does not fit the one-byte tube field
    #[error("Tube position {tube} out of range (0-255)")]
    TubeOutOfRange { tube: u32 },

    #[error("Malformed relay frame: {bytes:02X?}")]
    MalformedFrame { bytes: Vec<u8> },
}

impl RelayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::Open { .. } | RelayError::Write { .. } => ErrorClass::Connection,
            RelayError::WriteTimeout { .. } => ErrorClass::ProtocolTimeout,
            RelayError::TubeOutOfRange { .. } | RelayError::MalformedFrame { .. } => {
                ErrorClass::Validation
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::WriteTimeout { .. })
    }
}
