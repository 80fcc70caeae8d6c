//! Core types for the sMDT high-voltage test station.
//!
//! Everything the driver crates and the sequencer share lives here:
//!
//! - [`channel`]: validated channel identifiers, polarity, test mode
//! - [`parameters`]: run timing and per-polarity supply settings
//! - [`sample`]: telemetry records and channel status decoding
//! - [`port`]: serial port descriptors
//! - [`error`]: validation errors and the error classes used by every crate
//! - [`cancel`]: cooperative run cancellation
//! - [`config`]: station configuration (Figment, JSON + environment)
//! - [`logging`]: tracing subscriber setup

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod parameters;
pub mod port;
pub mod sample;

pub use cancel::CancelFlag;
pub use channel::{ChannelId, Polarity, TestMode, CHANNEL_COUNT};
pub use error::{ErrorClass, ValidationError};
pub use parameters::{PowerDownMethod, TestConfiguration, TestParameters};
pub use port::PortDescriptor;
pub use sample::{ChannelStatusFlags, ChannelStatusReport, TubeDataSample};
