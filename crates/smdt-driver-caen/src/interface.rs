//! Typed wrapper over the vendor library.
//!
//! [`HvDeviceInterface`] owns the vendor handle for one supply. It formats
//! the connection string, keeps the crate map captured at connect time, maps
//! the parameter enums to vendor keys and converts every non-zero vendor
//! result into an [`HvError`] carrying the vendor's diagnostic text.
//!
//! The handle is released on [`disconnect_from_psu`](HvDeviceInterface::disconnect_from_psu)
//! or, failing that, when the interface is dropped.

use crate::error::{HvError, Result};
use crate::library::{HvLibrary, LinkType, SlotInfo, SystemType, VendorCode};
use crate::parameters::{BoardParameter, FloatParameter, LongParameter};
use serde::Serialize;
use smdt_core::channel::{ensure_channel_count, ChannelId};
use smdt_core::port::PortDescriptor;
use tracing::{debug, info, instrument, warn};

/// Slot of the desktop supply's single board.
const BOARD_SLOT: u16 = 0;

/// Identity of the connected supply, from the crate map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerSupplyProperties {
    pub model: String,
    pub description: String,
    pub slots: u16,
    pub channels: u16,
    pub serial: u16,
    pub firmware: String,
}

impl PowerSupplyProperties {
    fn from_crate_map(map: &[SlotInfo]) -> Option<Self> {
        let board = map.first()?;
        Some(Self {
            model: board.model.clone(),
            description: board.description.clone(),
            slots: u16::try_from(map.len()).unwrap_or(u16::MAX),
            channels: board.channels,
            serial: board.serial,
            firmware: board.firmware(),
        })
    }
}

/// Vendor connection string: `port_baud_data_stop_parity_lbus`.
pub fn connection_string(port: &PortDescriptor) -> String {
    format!(
        "{}_{}_{}_{}_{}_{}",
        port.port, port.baud_rate, port.data_bits, port.stop_bits, port.parity, port.bus_address
    )
}

/// Connection to one HV supply through the vendor library.
pub struct HvDeviceInterface {
    library: Box<dyn HvLibrary>,
    handle: Option<i32>,
    properties: Option<PowerSupplyProperties>,
}

impl HvDeviceInterface {
    pub fn new(library: Box<dyn HvLibrary>) -> Self {
        Self {
            library,
            handle: None,
            properties: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Crate map snapshot taken at connect, if the supply reported one.
    pub fn properties(&self) -> Option<&PowerSupplyProperties> {
        self.properties.as_ref()
    }

    /// Open the supply. An existing connection is closed first.
    #[instrument(skip(self, port), fields(port = %port.port), err)]
    pub fn connect_to_psu(&mut self, port: &PortDescriptor) -> Result<()> {
        if self.is_connected() {
            debug!("Already connected, reconnecting");
            self.disconnect_from_psu()?;
        }

        let connection = connection_string(port);
        let handle = self
            .library
            .init_system(SystemType::N1470, LinkType::UsbVcp, &connection, "", "")
            .map_err(|code| HvError::Connection {
                connection: connection.clone(),
                code,
                message: self.library.last_error(),
            })?;
        self.handle = Some(handle);

        self.properties = match self.library.crate_map(handle) {
            Ok(map) => PowerSupplyProperties::from_crate_map(&map),
            Err(code) => {
                warn!(%code, error = %self.library.last_error(), "Unable to read crate map");
                None
            }
        };

        match &self.properties {
            Some(props) => info!(
                model = %props.model,
                serial = props.serial,
                firmware = %props.firmware,
                "Connected to power supply"
            ),
            None => info!("Connected to power supply"),
        }
        Ok(())
    }

    /// Release the vendor handle. A no-op when not connected.
    pub fn disconnect_from_psu(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.properties = None;
        self.library
            .deinit_system(handle)
            .map_err(|code| HvError::Connection {
                connection: format!("handle {}", handle),
                code,
                message: self.library.last_error(),
            })?;
        info!("Disconnected from power supply");
        Ok(())
    }

    fn handle(&self) -> Result<i32> {
        self.handle.ok_or(HvError::NotConnected)
    }

    fn vendor_error(&self, action: &'static str, parameter: &'static str, code: VendorCode) -> HvError {
        HvError::Vendor {
            action,
            parameter,
            code,
            message: self.library.last_error(),
        }
    }

    fn check_length<T>(parameter: &'static str, expected: usize, values: Vec<T>) -> Result<Vec<T>> {
        if values.len() != expected {
            return Err(HvError::ResponseLength {
                parameter,
                expected,
                actual: values.len(),
            });
        }
        Ok(values)
    }

    // =========================================================================
    // Channel parameters
    // =========================================================================

    /// Batched read of a float parameter, values in `channels` order.
    pub fn get_parameters_float(
        &mut self,
        parameter: FloatParameter,
        channels: &[ChannelId],
    ) -> Result<Vec<f64>> {
        ensure_channel_count(channels)?;
        let handle = self.handle()?;
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<u16> = channels.iter().map(|c| c.as_u16()).collect();
        let values = self
            .library
            .get_ch_param_float(handle, BOARD_SLOT, parameter.key(), &raw)
            .map_err(|code| self.vendor_error("get", parameter.key(), code))?;
        let values = Self::check_length(parameter.key(), channels.len(), values)?;
        Ok(values.into_iter().map(f64::from).collect())
    }

    /// Batched read of an unsigned parameter, values in `channels` order.
    pub fn get_parameters_long(
        &mut self,
        parameter: LongParameter,
        channels: &[ChannelId],
    ) -> Result<Vec<u32>> {
        ensure_channel_count(channels)?;
        let handle = self.handle()?;
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<u16> = channels.iter().map(|c| c.as_u16()).collect();
        let values = self
            .library
            .get_ch_param_long(handle, BOARD_SLOT, parameter.key(), &raw)
            .map_err(|code| self.vendor_error("get", parameter.key(), code))?;
        Self::check_length(parameter.key(), channels.len(), values)
    }

    pub fn set_parameters_float(
        &mut self,
        parameter: FloatParameter,
        value: f64,
        channels: &[ChannelId],
    ) -> Result<()> {
        ensure_channel_count(channels)?;
        let handle = self.handle()?;
        if channels.is_empty() {
            return Ok(());
        }
        let raw: Vec<u16> = channels.iter().map(|c| c.as_u16()).collect();
        // Vendor floats are single precision
        self.library
            .set_ch_param_float(handle, BOARD_SLOT, parameter.key(), &raw, value as f32)
            .map_err(|code| self.vendor_error("set", parameter.key(), code))?;
        debug!(parameter = parameter.key(), value, ?channels, "Set float parameter");
        Ok(())
    }

    pub fn set_parameters_long(
        &mut self,
        parameter: LongParameter,
        value: u32,
        channels: &[ChannelId],
    ) -> Result<()> {
        ensure_channel_count(channels)?;
        let handle = self.handle()?;
        if channels.is_empty() {
            return Ok(());
        }
        let raw: Vec<u16> = channels.iter().map(|c| c.as_u16()).collect();
        self.library
            .set_ch_param_long(handle, BOARD_SLOT, parameter.key(), &raw, value)
            .map_err(|code| self.vendor_error("set", parameter.key(), code))?;
        debug!(parameter = parameter.key(), value, ?channels, "Set long parameter");
        Ok(())
    }

    // =========================================================================
    // Board parameters
    // =========================================================================

    fn get_board(&mut self, parameter: BoardParameter) -> Result<u32> {
        let handle = self.handle()?;
        self.library
            .get_bd_param_long(handle, BOARD_SLOT, parameter.key())
            .map_err(|code| self.vendor_error("get", parameter.key(), code))
    }

    fn set_board(&mut self, parameter: BoardParameter, value: u32) -> Result<()> {
        let handle = self.handle()?;
        self.library
            .set_bd_param_long(handle, BOARD_SLOT, parameter.key(), value)
            .map_err(|code| self.vendor_error("set", parameter.key(), code))
    }

    /// Whether the board has a latched alarm.
    pub fn check_alarm(&mut self) -> Result<bool> {
        Ok(self.get_board(BoardParameter::BdAlarm)? != 0)
    }

    pub fn clear_alarm(&mut self) -> Result<()> {
        self.set_board(BoardParameter::BdClrAlm, 1)?;
        info!("Cleared board alarm");
        Ok(())
    }

    /// Whether the interlock is open (outputs inhibited).
    pub fn check_interlock(&mut self) -> Result<bool> {
        Ok(self.get_board(BoardParameter::BdIlk)? != 0)
    }

    pub fn set_interlock(&mut self, enabled: bool) -> Result<()> {
        self.set_board(BoardParameter::BdIlkm, u32::from(enabled))?;
        info!(enabled, "Set interlock mode");
        Ok(())
    }
}

impl Drop for HvDeviceInterface {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(code) = self.library.deinit_system(handle) {
                warn!(%code, "Failed to release power supply handle on drop");
            }
        }
    }
}
