//! Run timing parameters and per-polarity supply configuration.

use crate::error::{check_range, ValidationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest tube count per channel whose physical positions still fit the
/// one-byte relay tube field for all four channels.
pub const MAX_TUBES_PER_CHANNEL: u32 = 64;

// =============================================================================
// Test Parameters
// =============================================================================

/// Timing of a test run. Immutable once a run has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestParameters {
    /// Dwell time per tube, in one-second sampling ticks.
    #[serde(default = "default_seconds_per_tube")]
    pub seconds_per_tube: u32,
    /// Tubes attached to each channel.
    #[serde(default = "default_tubes_per_channel")]
    pub tubes_per_channel: u32,
    /// Settling time before the offset current is sampled, in seconds.
    #[serde(default = "default_time_for_testing_voltage")]
    pub time_for_testing_voltage: u32,
}

fn default_seconds_per_tube() -> u32 {
    10
}

fn default_tubes_per_channel() -> u32 {
    8
}

fn default_time_for_testing_voltage() -> u32 {
    1
}

impl Default for TestParameters {
    fn default() -> Self {
        Self {
            seconds_per_tube: default_seconds_per_tube(),
            tubes_per_channel: default_tubes_per_channel(),
            time_for_testing_voltage: default_time_for_testing_voltage(),
        }
    }
}

impl TestParameters {
    pub fn new(seconds_per_tube: u32, tubes_per_channel: u32, time_for_testing_voltage: u32) -> Self {
        Self {
            seconds_per_tube,
            tubes_per_channel,
            time_for_testing_voltage,
        }
    }

    /// Validate the parameters after loading or before a run.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.seconds_per_tube < 1 {
            return Err(ValidationError::InvalidParameters {
                message: "seconds_per_tube must be at least 1".to_string(),
            });
        }
        if self.tubes_per_channel == 0 {
            return Err(ValidationError::InvalidParameters {
                message: "tubes_per_channel must be greater than 0".to_string(),
            });
        }
        if self.tubes_per_channel > MAX_TUBES_PER_CHANNEL {
            return Err(ValidationError::InvalidParameters {
                message: format!(
                    "tubes_per_channel {} exceeds {} (relay positions are one byte)",
                    self.tubes_per_channel, MAX_TUBES_PER_CHANNEL
                ),
            });
        }
        Ok(())
    }

    /// Physical relay position of tube `index` on `channel`.
    pub fn tube_position(&self, channel: u8, index: u32) -> u32 {
        self.tubes_per_channel * u32::from(channel) + index
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs(u64::from(self.seconds_per_tube))
    }

    pub fn settle_for_testing_voltage(&self) -> Duration {
        Duration::from_secs(u64::from(self.time_for_testing_voltage))
    }
}

// =============================================================================
// Power Down Method
// =============================================================================

/// What the supply does when a channel is switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "PowerDownRepr")]
pub enum PowerDownMethod {
    /// Drop the output immediately.
    Kill,
    /// Ramp down at the configured rate.
    Ramp,
}

impl PowerDownMethod {
    pub fn is_kill(self) -> bool {
        matches!(self, PowerDownMethod::Kill)
    }
}

/// Station files written by older tooling store the method as an integer
/// (non-zero meaning kill).
#[derive(Deserialize)]
#[serde(untagged)]
enum PowerDownRepr {
    Name(String),
    Code(i64),
}

impl TryFrom<PowerDownRepr> for PowerDownMethod {
    type Error = String;

    fn try_from(repr: PowerDownRepr) -> Result<Self, Self::Error> {
        match repr {
            PowerDownRepr::Code(0) => Ok(PowerDownMethod::Ramp),
            PowerDownRepr::Code(_) => Ok(PowerDownMethod::Kill),
            PowerDownRepr::Name(name) => match name.to_lowercase().as_str() {
                "kill" => Ok(PowerDownMethod::Kill),
                "ramp" => Ok(PowerDownMethod::Ramp),
                other => Err(format!(
                    "Invalid power_down_method '{}'. Must be one of: kill, ramp",
                    other
                )),
            },
        }
    }
}

// =============================================================================
// Test Configuration
// =============================================================================

/// Supply settings applied to every channel of one polarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestConfiguration {
    /// Operating voltage during the test (V).
    pub test_voltage: f64,
    /// Current limit (µA).
    pub current_limit: f64,
    /// Software voltage ceiling (V).
    pub max_voltage: f64,
    /// Ramp-up rate (V/s).
    pub ramp_up_rate: f64,
    /// Ramp-down rate (V/s).
    pub ramp_down_rate: f64,
    /// Time the current may exceed the limit before tripping (s).
    pub over_current_limit: f64,
    pub power_down_method: PowerDownMethod,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            test_voltage: 15.0,
            current_limit: 2.0,
            max_voltage: 4015.0,
            ramp_up_rate: 15.0,
            ramp_down_rate: 15.0,
            over_current_limit: 1000.0,
            power_down_method: PowerDownMethod::Ramp,
        }
    }
}

impl TestConfiguration {
    /// Consistency checks independent of the supply's limits.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("test_voltage", self.test_voltage, 0.0, self.max_voltage)?;
        check_range("current_limit", self.current_limit, 0.0, f64::MAX)?;
        check_range("ramp_up_rate", self.ramp_up_rate, f64::MIN_POSITIVE, f64::MAX)?;
        check_range("ramp_down_rate", self.ramp_down_rate, f64::MIN_POSITIVE, f64::MAX)?;
        check_range("over_current_limit", self.over_current_limit, 0.0, f64::MAX)?;
        Ok(())
    }

    /// Time to ramp from zero to the test voltage.
    pub fn ramp_up_time(&self) -> Duration {
        ramp_time(self.test_voltage, self.ramp_up_rate)
    }

    /// Time to ramp from the test voltage back to zero.
    pub fn ramp_down_time(&self) -> Duration {
        ramp_time(self.test_voltage, self.ramp_down_rate)
    }
}

fn ramp_time(voltage: f64, rate: f64) -> Duration {
    let secs = voltage / rate;
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}
