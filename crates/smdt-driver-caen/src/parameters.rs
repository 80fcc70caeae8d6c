//! Closed vocabulary of supply parameters, mapped to vendor keys.
//!
//! Splitting float and unsigned parameters into separate enums makes it a
//! compile error to read `VSet` as an integer or `Pw` as a float.

use std::fmt;

/// Float-valued channel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatParameter {
    /// Programmed operating voltage (V)
    VSet,
    /// Current limit (µA)
    ISet,
    /// Monitored voltage (V)
    VMon,
    /// Monitored current, high range (µA)
    IMonH,
    /// Monitored current, low range (µA)
    IMonL,
    /// Software voltage ceiling (V)
    MaxV,
    /// Ramp-up rate (V/s)
    RUp,
    /// Ramp-down rate (V/s)
    RDwn,
    /// Over-current trip time (s)
    Trip,
}

impl FloatParameter {
    pub fn key(self) -> &'static str {
        match self {
            FloatParameter::VSet => "VSet",
            FloatParameter::ISet => "ISet",
            FloatParameter::VMon => "VMon",
            FloatParameter::IMonH => "IMonH",
            FloatParameter::IMonL => "IMonL",
            FloatParameter::MaxV => "MaxV",
            FloatParameter::RUp => "RUp",
            FloatParameter::RDwn => "RDwn",
            FloatParameter::Trip => "Trip",
        }
    }
}

/// Unsigned channel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LongParameter {
    /// Output enable (1 on, 0 off)
    Pw,
    /// Power-down mode (0 kill, 1 ramp)
    PDwn,
    /// Output polarity (0 normal)
    Polarity,
    /// Status bitfield
    ChStatus,
    /// Current monitor range (0 high, 1 low)
    ImonRange,
}

impl LongParameter {
    pub fn key(self) -> &'static str {
        match self {
            LongParameter::Pw => "Pw",
            LongParameter::PDwn => "PDwn",
            LongParameter::Polarity => "Polarity",
            LongParameter::ChStatus => "ChStatus",
            LongParameter::ImonRange => "ImonRange",
        }
    }
}

/// Board-level parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardParameter {
    /// Alarm status (non-zero when an alarm is latched)
    BdAlarm,
    /// Write 1 to clear a latched alarm
    BdClrAlm,
    /// Interlock status (non-zero when the interlock is open)
    BdIlk,
    /// Interlock mode
    BdIlkm,
}

impl BoardParameter {
    pub fn key(self) -> &'static str {
        match self {
            BoardParameter::BdAlarm => "BdAlarm",
            BoardParameter::BdClrAlm => "BdClrAlm",
            BoardParameter::BdIlk => "BdIlk",
            BoardParameter::BdIlkm => "BdIlkm",
        }
    }
}

impl fmt::Display for FloatParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl fmt::Display for LongParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl fmt::Display for BoardParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Power-down mode values of `PDwn`.
pub const PDWN_KILL: u32 = 0;
pub const PDWN_RAMP: u32 = 1;

/// Current monitor range of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurrentRange {
    High,
    /// Low range: finer resolution, read through `IMonL`
    Low,
}

impl CurrentRange {
    pub fn from_raw(raw: u32) -> Self {
        if raw == 0 {
            CurrentRange::High
        } else {
            CurrentRange::Low
        }
    }
}
