//! Channel identifiers, polarity and test mode.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of high-voltage channels on the supply.
pub const CHANNEL_COUNT: usize = 4;

/// Highest valid channel identifier.
pub const MAX_CHANNEL: u8 = (CHANNEL_COUNT - 1) as u8;

/// A validated supply channel identifier in `[0, 3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelId(u8);

impl ChannelId {
    /// Create a channel identifier, rejecting values above [`MAX_CHANNEL`].
    pub fn new(channel: u8) -> Result<Self, ValidationError> {
        if channel > MAX_CHANNEL {
            return Err(ValidationError::ChannelOutOfRange {
                channel,
                max: MAX_CHANNEL,
            });
        }
        Ok(Self(channel))
    }

    /// All four channels in ascending order.
    pub fn all() -> [ChannelId; CHANNEL_COUNT] {
        [Self(0), Self(1), Self(2), Self(3)]
    }

    /// Raw identifier.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Identifier as passed to the vendor library.
    pub fn as_u16(self) -> u16 {
        u16::from(self.0)
    }

    /// Position of this channel in a per-channel array.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelId> for u8 {
    fn from(channel: ChannelId) -> Self {
        channel.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reject channel lists longer than the supply has channels.
pub fn ensure_channel_count(channels: &[ChannelId]) -> Result<(), ValidationError> {
    if channels.len() > CHANNEL_COUNT {
        return Err(ValidationError::TooManyChannels {
            count: channels.len(),
            max: CHANNEL_COUNT,
        });
    }
    Ok(())
}

/// Validate the channel list for a test run: non-empty, at most four,
/// no duplicates.
pub fn validate_run_channels(channels: &[ChannelId]) -> Result<(), ValidationError> {
    ensure_channel_count(channels)?;
    if channels.is_empty() {
        return Err(ValidationError::NoChannels);
    }
    for (i, channel) in channels.iter().enumerate() {
        if channels[..i].contains(channel) {
            return Err(ValidationError::DuplicateChannel {
                channel: channel.get(),
            });
        }
    }
    Ok(())
}

/// Channel polarity as reported by the supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Normal,
    Reverse,
}

impl Polarity {
    /// Decode the vendor's raw polarity value (0 is normal).
    pub fn from_raw(raw: u32) -> Self {
        if raw == 0 {
            Polarity::Normal
        } else {
            Polarity::Reverse
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Normal => write!(f, "normal"),
            Polarity::Reverse => write!(f, "reverse"),
        }
    }
}

/// Which of the two test programs a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Offset calibration followed by the timed per-tube scan.
    Normal,
    /// All tubes connected and energized until stopped; no sampling.
    Reverse,
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestMode::Normal => write!(f, "normal"),
            TestMode::Reverse => write!(f, "reverse"),
        }
    }
}
