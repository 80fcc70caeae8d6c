//! The vendor SDK seam.
//!
//! [`HvLibrary`] mirrors the calls of the CAEN HV wrapper library that the
//! station uses, with the C out-parameters turned into return values. A
//! non-zero vendor result is surfaced as [`VendorCode`]; turning it into an
//! [`HvError`](crate::HvError) with the vendor's diagnostic text is the job of
//! [`HvDeviceInterface`](crate::HvDeviceInterface).
//!
//! Implementations:
//! - [`SimulatedHvLibrary`](crate::sim::SimulatedHvLibrary): in-process stand-in
//! - `CaenHvWrapper` (feature `caen-sdk`): the real wrapper library

use serde::{Deserialize, Serialize};
use std::fmt;

/// Non-zero result code of a vendor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VendorCode(pub i32);

impl fmt::Display for VendorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code 0x{:X}", self.0)
    }
}

/// Vendor system type passed to `InitSystem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SystemType {
    /// N1470 desktop supply family (DT147x included)
    N1470 = 6,
}

/// Vendor link type passed to `InitSystem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LinkType {
    /// USB virtual COM port
    UsbVcp = 5,
}

/// One slot of the crate map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub slot: u16,
    pub model: String,
    pub description: String,
    pub channels: u16,
    pub serial: u16,
    pub firmware_major: u8,
    pub firmware_minor: u8,
}

impl SlotInfo {
    pub fn firmware(&self) -> String {
        format!("{}.{}", self.firmware_major, self.firmware_minor)
    }
}

/// The subset of the vendor wrapper library used by the station.
///
/// Calls are blocking. The library instance belongs to one connection, so
/// [`last_error`](HvLibrary::last_error) refers to the last failed call on it.
pub trait HvLibrary: Send {
    /// Open a connection and return the vendor handle.
    fn init_system(
        &mut self,
        system: SystemType,
        link: LinkType,
        connection: &str,
        username: &str,
        password: &str,
    ) -> Result<i32, VendorCode>;

    fn deinit_system(&mut self, handle: i32) -> Result<(), VendorCode>;

    fn crate_map(&mut self, handle: i32) -> Result<Vec<SlotInfo>, VendorCode>;

    /// Batched read of a float channel parameter, one value per channel.
    fn get_ch_param_float(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        channels: &[u16],
    ) -> Result<Vec<f32>, VendorCode>;

    /// Batched read of an unsigned channel parameter, one value per channel.
    fn get_ch_param_long(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        channels: &[u16],
    ) -> Result<Vec<u32>, VendorCode>;

    fn set_ch_param_float(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        channels: &[u16],
        value: f32,
    ) -> Result<(), VendorCode>;

    fn set_ch_param_long(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        channels: &[u16],
        value: u32,
    ) -> Result<(), VendorCode>;

    fn get_bd_param_long(&mut self, handle: i32, slot: u16, parameter: &str)
        -> Result<u32, VendorCode>;

    fn set_bd_param_long(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        value: u32,
    ) -> Result<(), VendorCode>;

    /// Diagnostic text of the last failed call.
    fn last_error(&self) -> String;
}
