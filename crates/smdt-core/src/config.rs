//! Station configuration using Figment
//!
//! Configuration is loaded from:
//! 1. the station JSON file (ports, test timing, per-polarity settings)
//! 2. environment variables prefixed with `SMDT_`, nested keys separated by
//!    `__` (e.g. `SMDT_TEST__SECONDS_PER_TUBE=4`)
//!
//! # Example
//! ```no_run
//! use smdt_core::config::StationConfig;
//!
//! let config = StationConfig::load_from("station.json")?;
//! config.validate().map_err(figment::Error::from)?;
//! println!("Relay board on {}", config.port.hw.port);
//! # Ok::<(), figment::Error>(())
//! ```

use crate::channel::{validate_run_channels, ChannelId, TestMode};
use crate::logging::OutputFormat;
use crate::parameters::{TestConfiguration, TestParameters};
use crate::port::PortDescriptor;
use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SMDT_";

/// Top-level station configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub port: PortsConfig,
    pub test: TestSection,
    /// Channel sets per polarity, used when no channels are given explicitly
    #[serde(default)]
    pub channels: ChannelSets,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial ports of the station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    /// High-voltage supply
    pub psu: PortDescriptor,
    /// Relay (tube switching) board
    pub hw: PortDescriptor,
}

/// Test timing plus the supply settings for each polarity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSection {
    #[serde(default = "default_seconds_per_tube")]
    pub seconds_per_tube: u32,
    #[serde(default = "default_tubes_per_channel")]
    pub tubes_per_channel: u32,
    #[serde(default = "default_time_for_testing_voltage")]
    pub time_for_testing_voltage: u32,
    #[serde(default)]
    pub normal: TestConfiguration,
    #[serde(default)]
    pub reverse: TestConfiguration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSets {
    #[serde(default)]
    pub normal: Vec<ChannelId>,
    #[serde(default)]
    pub reverse: Vec<ChannelId>,
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: OutputFormat::default(),
        }
    }
}

// Default value functions
fn default_seconds_per_tube() -> u32 {
    TestParameters::default().seconds_per_tube
}

fn default_tubes_per_channel() -> u32 {
    TestParameters::default().tubes_per_channel
}

fn default_time_for_testing_voltage() -> u32 {
    TestParameters::default().time_for_testing_voltage
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TestSection {
    pub fn parameters(&self) -> TestParameters {
        TestParameters::new(
            self.seconds_per_tube,
            self.tubes_per_channel,
            self.time_for_testing_voltage,
        )
    }

    pub fn configuration(&self, mode: TestMode) -> &TestConfiguration {
        match mode {
            TestMode::Normal => &self.normal,
            TestMode::Reverse => &self.reverse,
        }
    }
}

impl ChannelSets {
    pub fn for_mode(&self, mode: TestMode) -> &[ChannelId] {
        match mode {
            TestMode::Normal => &self.normal,
            TestMode::Reverse => &self.reverse,
        }
    }
}

impl StationConfig {
    /// Load configuration from a JSON file and `SMDT_` environment variables
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The provider stack used by [`load_from`](Self::load_from)
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Json::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        self.test
            .parameters()
            .validate()
            .map_err(|e| e.to_string())?;
        self.test
            .normal
            .validate()
            .map_err(|e| format!("test.normal: {}", e))?;
        self.test
            .reverse
            .validate()
            .map_err(|e| format!("test.reverse: {}", e))?;

        for (name, set) in [
            ("normal", &self.channels.normal),
            ("reverse", &self.channels.reverse),
        ] {
            if !set.is_empty() {
                validate_run_channels(set).map_err(|e| format!("channels.{}: {}", name, e))?;
            }
        }
        if let Some(shared) = self
            .channels
            .normal
            .iter()
            .find(|c| self.channels.reverse.contains(*c))
        {
            return Err(format!(
                "Channel {} listed as both normal and reverse",
                shared
            ));
        }

        crate::logging::parse_log_level(&self.logging.level)?;

        if self.port.psu.port.is_empty() || self.port.hw.port.is_empty() {
            return Err("port.psu.port and port.hw.port must be set".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::PowerDownMethod;

    const STATION_JSON: &str = r#"{
        "port": {
            "psu": {"port": "ttyACM0", "baud_rate": "9600", "data_bit": "8",
                    "stop_bit": "0", "parity": "0", "lbusaddress": "0"},
            "hw":  {"port": "ttyUSB0", "baud_rate": "9600", "data_bit": "8",
                    "stop_bit": "0", "parity": "0", "lbusaddress": "0"}
        },
        "test": {
            "seconds_per_tube": 4,
            "tubes_per_channel": 16,
            "time_for_testing_voltage": 2,
            "normal": {"test_voltage": 15, "current_limit": 2, "max_voltage": 4015,
                       "ramp_up_rate": 15, "ramp_down_rate": 15,
                       "over_current_limit": 1000, "power_down_method": 0},
            "reverse": {"test_voltage": 30, "current_limit": 2, "max_voltage": 4015,
                        "ramp_up_rate": 10, "ramp_down_rate": 10,
                        "over_current_limit": 1000, "power_down_method": "kill"}
        },
        "channels": {"normal": [0, 1], "reverse": [2, 3]}
    }"#;

    // Every test loads through a Jail so environment overrides set by one
    // test never leak into another.
    fn with_station_file<F>(test: F)
    where
        F: FnOnce(&mut figment::Jail) -> figment::error::Result<()>,
    {
        figment::Jail::expect_with(|jail| {
            jail.create_file("station.json", STATION_JSON)?;
            test(jail)
        });
    }

    #[test]
    fn test_load_station_file() {
        with_station_file(|_| {
            let config = StationConfig::load_from("station.json")?;

            assert_eq!(config.port.psu.port, "ttyACM0");
            assert_eq!(config.port.hw.baud_rate, 9600);
            assert_eq!(config.test.parameters(), TestParameters::new(4, 16, 2));
            assert_eq!(config.test.normal.power_down_method, PowerDownMethod::Ramp);
            assert_eq!(config.test.reverse.power_down_method, PowerDownMethod::Kill);
            assert_eq!(config.test.reverse.test_voltage, 30.0);
            assert_eq!(config.channels.for_mode(TestMode::Reverse).len(), 2);
            assert_eq!(config.logging.level, "info");
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        with_station_file(|jail| {
            jail.set_env("SMDT_TEST__SECONDS_PER_TUBE", "7");
            jail.set_env("SMDT_LOGGING__LEVEL", "debug");

            let config = StationConfig::load_from("station.json")?;
            assert_eq!(config.test.seconds_per_tube, 7);
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_overlapping_channel_sets_rejected() {
        with_station_file(|_| {
            let mut config = StationConfig::load_from("station.json")?;
            config.channels.reverse.push(ChannelId::new(1).unwrap());
            let err = config.validate().unwrap_err();
            assert!(err.contains("both normal and reverse"));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        with_station_file(|_| {
            let mut config = StationConfig::load_from("station.json")?;
            config.test.seconds_per_tube = 0;
            assert!(config.validate().is_err());

            config.test.seconds_per_tube = 4;
            config.logging.level = "loud".to_string();
            assert!(config.validate().is_err());
            Ok(())
        });
    }
}
