//! Error classification shared by every station crate.
//!
//! Each driver crate owns a `thiserror` enum for its own failure modes
//! (`HvError`, `RelayError`). They all map onto [`ErrorClass`], which is what
//! the sequencer inspects when deciding whether a failure is swallowed or
//! aborts a run:
//!
//! - **`Connection`**: the device or port could not be opened or has gone away.
//! - **`Validation`**: arguments were rejected before any hardware call was made.
//! - **`TransientRead`**: a single device call failed; the caller may retry on
//!   the next tick.
//! - **`ProtocolTimeout`**: a relay frame could not be confirmed written within
//!   its bound. Always fatal for a run.

use thiserror::Error;

// =============================================================================
// Error Classes
// =============================================================================

/// Coarse category of a station failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Device or port could not be opened, or is not open.
    Connection,
    /// Arguments rejected before touching hardware.
    Validation,
    /// A single device call failed.
    TransientRead,
    /// A relay frame write was not confirmed in time.
    ProtocolTimeout,
}

impl ErrorClass {
    /// Whether a failure of this class must abort a running test.
    pub fn is_fatal_for_run(self) -> bool {
        matches!(self, ErrorClass::Connection | ErrorClass::ProtocolTimeout)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorClass::Connection => "connection",
            ErrorClass::Validation => "validation",
            ErrorClass::TransientRead => "transient_read",
            ErrorClass::ProtocolTimeout => "protocol_timeout",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Argument validation failures, raised before any hardware call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A channel list is longer than the four channels of the supply.
    #[error("Too many channels: got {count}, at most {max} are supported")]
    TooManyChannels { count: usize, max: usize },

    /// A channel list handed to a run was empty.
    #[error("Channel list is empty")]
    NoChannels,

    /// A channel appears more than once in a run's channel list.
    #[error("Channel {channel} listed more than once")]
    DuplicateChannel { channel: u8 },

    /// Channel identifier outside `[0, 3]`.
    #[error("Channel {channel} out of range (valid channels are 0-{max})")]
    ChannelOutOfRange { channel: u8, max: u8 },

    /// Numeric parameter outside its accepted range.
    #[error("{parameter} value {value} out of range ({min}-{max})")]
    OutOfRange {
        parameter: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Numeric parameter that is NaN or infinite.
    #[error("{parameter} value {value} is not a finite number")]
    NotFinite { parameter: &'static str, value: f64 },

    /// Test parameters that cannot describe a valid run.
    #[error("Invalid test parameters: {message}")]
    InvalidParameters { message: String },
}

impl ValidationError {
    /// Every validation error belongs to [`ErrorClass::Validation`].
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

/// Check that a value is finite and inside `min..=max`.
pub fn check_range(
    parameter: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { parameter, value });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            parameter,
            value,
            min,
            max,
        });
    }
    Ok(())
}
