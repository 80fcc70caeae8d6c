//! Telemetry records published during a run.

use crate::channel::ChannelId;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value of current and voltage before the first read of a run.
pub const SENTINEL_READING: f64 = -1.0;

/// Latest reading of the tube currently connected on one channel.
///
/// One live instance exists per active channel and is overwritten every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TubeDataSample {
    pub channel: ChannelId,
    /// Tube index within the channel, `0..tubes_per_channel`.
    pub tube: u32,
    /// Offset-corrected leakage current (nA).
    pub current_na: f64,
    /// Monitored voltage (V).
    pub voltage: f64,
    pub is_active: bool,
    pub timestamp: DateTime<Utc>,
}

impl TubeDataSample {
    /// Fresh sample for a newly connected tube, holding sentinel readings.
    pub fn connected(channel: ChannelId, tube: u32) -> Self {
        Self {
            channel,
            tube,
            current_na: SENTINEL_READING,
            voltage: SENTINEL_READING,
            is_active: true,
            timestamp: Utc::now(),
        }
    }

    pub fn has_reading(&self) -> bool {
        self.current_na != SENTINEL_READING || self.voltage != SENTINEL_READING
    }
}

bitflags! {
    /// Channel status bitfield as reported by the supply (`ChStatus`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelStatusFlags: u32 {
        const ON = 1 << 0;
        const RAMP_UP = 1 << 1;
        const RAMP_DOWN = 1 << 2;
        const OVER_CURRENT = 1 << 3;
        const OVER_VOLTAGE = 1 << 4;
        const UNDER_VOLTAGE = 1 << 5;
        const EXTERNAL_TRIP = 1 << 6;
        const MAX_VOLTAGE = 1 << 7;
        const EXTERNAL_DISABLE = 1 << 8;
        const INTERNAL_TRIP = 1 << 9;
        const CALIBRATION_ERROR = 1 << 10;
        const UNPLUGGED = 1 << 11;
    }
}

const STATUS_TOKENS: &[(ChannelStatusFlags, &str)] = &[
    (ChannelStatusFlags::ON, "ON"),
    (ChannelStatusFlags::RAMP_UP, "RUP"),
    (ChannelStatusFlags::RAMP_DOWN, "RDW"),
    (ChannelStatusFlags::OVER_CURRENT, "OVC"),
    (ChannelStatusFlags::OVER_VOLTAGE, "OVV"),
    (ChannelStatusFlags::UNDER_VOLTAGE, "UNV"),
    (ChannelStatusFlags::EXTERNAL_TRIP, "EXTTRIP"),
    (ChannelStatusFlags::MAX_VOLTAGE, "MAXV"),
    (ChannelStatusFlags::EXTERNAL_DISABLE, "EXTDIS"),
    (ChannelStatusFlags::INTERNAL_TRIP, "INTTRIP"),
    (ChannelStatusFlags::CALIBRATION_ERROR, "CALERR"),
    (ChannelStatusFlags::UNPLUGGED, "UNPLUGGED"),
];

impl ChannelStatusFlags {
    /// Human-readable tokens in bit order. A channel that is not on starts
    /// with `OFF`; unknown high bits are ignored.
    pub fn tokens(self) -> Vec<&'static str> {
        let mut tokens = Vec::new();
        if !self.contains(ChannelStatusFlags::ON) {
            tokens.push("OFF");
        }
        tokens.extend(
            STATUS_TOKENS
                .iter()
                .filter(|(flag, _)| self.contains(*flag))
                .map(|(_, token)| *token),
        );
        tokens
    }

    /// Any condition that means the channel tripped or is faulted.
    pub fn is_fault(self) -> bool {
        self.intersects(
            ChannelStatusFlags::OVER_CURRENT
                | ChannelStatusFlags::OVER_VOLTAGE
                | ChannelStatusFlags::EXTERNAL_TRIP
                | ChannelStatusFlags::INTERNAL_TRIP
                | ChannelStatusFlags::CALIBRATION_ERROR
                | ChannelStatusFlags::UNPLUGGED,
        )
    }
}

/// Decoded status of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatusReport {
    pub channel: ChannelId,
    pub raw: u32,
    pub tokens: Vec<String>,
}

impl ChannelStatusReport {
    pub fn decode(channel: ChannelId, raw: u32) -> Self {
        let tokens = ChannelStatusFlags::from_bits_truncate(raw)
            .tokens()
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            channel,
            raw,
            tokens,
        }
    }

    pub fn flags(&self) -> ChannelStatusFlags {
        ChannelStatusFlags::from_bits_truncate(self.raw)
    }
}
