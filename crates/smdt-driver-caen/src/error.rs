//! Error types for HV supply operations.

use crate::library::VendorCode;
use smdt_core::error::{ErrorClass, ValidationError};
use thiserror::Error;

/// Result type alias for HV supply operations.
pub type Result<T> = std::result::Result<T, HvError>;

/// Errors that can occur when talking to the HV supply.
#[derive(Error, Debug, Clone)]
pub enum HvError {
    /// `InitSystem` rejected the connection
    #[error("Unable to connect to power supply on '{connection}' ({code}): {message}")]
    Connection {
        connection: String,
        code: VendorCode,
        message: String,
    },

    /// An operation needed an open connection
    #[error("Power supply is not connected")]
    NotConnected,

    /// A vendor call returned a non-zero result
    #[error("Unable to {action} parameter {parameter} ({code}). Error: {message}")]
    Vendor {
        action: &'static str,
        parameter: &'static str,
        code: VendorCode,
        message: String,
    },

    /// The vendor returned a different number of values than channels requested
    #[error("Parameter {parameter}: expected {expected} values, got {actual}")]
    ResponseLength {
        parameter: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Arguments rejected before any hardware call
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl HvError {
    /// Classify this error for the sequencer.
    pub fn class(&self) -> ErrorClass {
        match self {
            HvError::Connection { .. } | HvError::NotConnected => ErrorClass::Connection,
            HvError::Vendor { .. } | HvError::ResponseLength { .. } => ErrorClass::TransientRead,
            HvError::Validation(_) => ErrorClass::Validation,
        }
    }

    /// Check if this error was raised by argument validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, HvError::Validation(_))
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, HvError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_error_display() {
        let err = HvError::Vendor {
            action: "set",
            parameter: "VSet",
            code: VendorCode(0x12),
            message: "Parameter not found".to_string(),
        };
        let text = err.to_string();
        assert!(text.starts_with("Unable to set parameter VSet"));
        assert!(text.ends_with("Error: Parameter not found"));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(HvError::NotConnected.class(), ErrorClass::Connection);
        let validation = HvError::from(ValidationError::TooManyChannels { count: 5, max: 4 });
        assert!(validation.is_validation());
        assert_eq!(validation.class(), ErrorClass::Validation);
    }
}
