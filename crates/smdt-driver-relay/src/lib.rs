//! Driver for the relay board that switches individual sMDT tubes onto the
//! high-voltage supply channels.
//!
//! ```rust,no_run
//! use smdt_core::PortDescriptor;
//! use smdt_driver_relay::{RelayProtocolDriver, RelayTimings};
//!
//! # async fn demo() -> Result<(), smdt_driver_relay::RelayError> {
//! let mut relay = RelayProtocolDriver::open(&PortDescriptor::new("/dev/ttyUSB0"), RelayTimings::default()).await?;
//! relay.connect_tube(3).await?;
//! relay.disconnect_tube(3).await?;
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod error;
pub mod frame;

pub use driver::{DynSerial, RelayProtocolDriver, RelayTimings, SerialPortIO};
pub use error::{RelayError, Result};
pub use frame::RelayFrame;
