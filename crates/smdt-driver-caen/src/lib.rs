//! CAEN high-voltage supply driver for the sMDT test station.
//!
//! Layers, bottom-up:
//!
//! - [`library::HvLibrary`]: the vendor wrapper calls, with result codes
//! - [`interface::HvDeviceInterface`]: one connection, typed parameters,
//!   vendor diagnostics turned into [`HvError`]
//! - [`controller::PowerSupplyController`]: validated channel operations
//!
//! [`sim::SimulatedHvLibrary`] stands in for the hardware. The real library
//! binding lives behind the `caen-sdk` feature.
//!
//! # Example
//!
//! ```rust
//! use smdt_core::{ChannelId, PortDescriptor};
//! use smdt_driver_caen::{HvDeviceInterface, PowerSupplyController, sim::SimulatedHvLibrary};
//!
//! let device = HvDeviceInterface::new(Box::new(SimulatedHvLibrary::new()));
//! let mut psu = PowerSupplyController::new(device);
//! psu.connect(&PortDescriptor::new("ttyACM0"))?;
//!
//! let channels = [ChannelId::new(0)?, ChannelId::new(1)?];
//! psu.set_test_voltages(&channels, 15.0)?;
//! psu.power_on_channels(&channels)?;
//! let currents_ua = psu.read_currents(&channels)?;
//! assert_eq!(currents_ua.len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod controller;
pub mod error;
pub mod interface;
pub mod library;
pub mod parameters;
pub mod sim;

#[cfg(feature = "caen-sdk")]
pub mod ffi;

pub use controller::{ControllerLimits, PowerSupplyController};
pub use error::{HvError, Result};
pub use interface::{connection_string, HvDeviceInterface, PowerSupplyProperties};
pub use library::{HvLibrary, VendorCode};
pub use parameters::{CurrentRange, FloatParameter, LongParameter};

#[cfg(feature = "caen-sdk")]
pub use ffi::CaenHvWrapper;
