//! Errors that end a run.

use smdt_core::error::ErrorClass;
use smdt_driver_caen::HvError;
use smdt_driver_relay::RelayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("Relay board: {0}")]
    Relay(#[from] RelayError),

    #[error("Power supply: {0}")]
    Hv(#[from] HvError),
}

impl SequencerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SequencerError::Relay(e) => e.class(),
            SequencerError::Hv(e) => e.class(),
        }
    }

    /// The relay port can no longer be trusted with frames.
    pub fn relay_unusable(&self) -> bool {
        matches!(self, SequencerError::Relay(e) if e.class().is_fatal_for_run())
    }
}

pub type Result<T> = std::result::Result<T, SequencerError>;
