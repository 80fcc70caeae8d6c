//! Serial port descriptors for the supply and the relay board.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Serial settings of one station port.
///
/// Station files store every field as a string (`"9600"`), so numeric fields
/// accept either numbers or numeric strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Port name (e.g. `/dev/ttyACM0`, `COM3`).
    pub port: String,
    #[serde(default = "default_baud_rate", deserialize_with = "number_or_string")]
    pub baud_rate: u32,
    #[serde(rename = "data_bit", default = "default_data_bits", deserialize_with = "number_or_string")]
    pub data_bits: u8,
    /// Stop bit code as used by the supply's link layer (0 = one stop bit).
    #[serde(rename = "stop_bit", default, deserialize_with = "number_or_string")]
    pub stop_bits: u8,
    /// Parity code (0 = none, 1 = odd, 2 = even).
    #[serde(default, deserialize_with = "number_or_string")]
    pub parity: u8,
    /// Local bus address of the supply.
    #[serde(rename = "lbusaddress", default, deserialize_with = "number_or_string")]
    pub bus_address: u8,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

impl PortDescriptor {
    /// A 9600 8N1 descriptor for `port`.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: 0,
            parity: 0,
            bus_address: 0,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_bus_address(mut self, bus_address: u8) -> Self {
        self.bus_address = bus_address;
        self
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.port, self.baud_rate)
    }
}

/// Deserialize an unsigned integer from a number or a numeric string.
pub fn number_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + TryFrom<u64>,
    <T as FromStr>::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => {
            T::try_from(n).map_err(|_| de::Error::custom(format!("value {} out of range", n)))
        }
        Repr::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}
