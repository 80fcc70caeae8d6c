//! Validated channel operations on the HV supply.
//!
//! Every operation checks its arguments before the first vendor call: more
//! than four channels, or a value outside [`ControllerLimits`], is rejected
//! without touching hardware. Set operations are issued as one vendor call
//! per channel; reads are batched into a single call.

use crate::error::Result;
use crate::interface::{HvDeviceInterface, PowerSupplyProperties};
use crate::parameters::{CurrentRange, FloatParameter, LongParameter, PDWN_KILL, PDWN_RAMP};
use smdt_core::channel::{ensure_channel_count, ChannelId, Polarity};
use smdt_core::error::check_range;
use smdt_core::parameters::{PowerDownMethod, TestConfiguration};
use smdt_core::port::PortDescriptor;
use tracing::{debug, info, instrument};

/// Accepted ranges for supply settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerLimits {
    /// Device maximum for test and max voltages (V)
    pub max_voltage: f64,
    /// Largest current limit (µA)
    pub max_current_limit: f64,
    pub min_ramp_rate: f64,
    pub max_ramp_rate: f64,
    /// Longest over-current trip time (s)
    pub max_trip_time: f64,
}

impl Default for ControllerLimits {
    fn default() -> Self {
        Self {
            max_voltage: 4015.0,
            max_current_limit: 3000.0,
            min_ramp_rate: 1.0,
            max_ramp_rate: 500.0,
            max_trip_time: 1000.0,
        }
    }
}

impl ControllerLimits {
    /// Check a whole configuration against these limits.
    pub fn check_configuration(&self, config: &TestConfiguration) -> Result<()> {
        check_range("test_voltage", config.test_voltage, 0.0, self.max_voltage)?;
        check_range("current_limit", config.current_limit, 0.0, self.max_current_limit)?;
        check_range("max_voltage", config.max_voltage, 0.0, self.max_voltage)?;
        check_range("ramp_up_rate", config.ramp_up_rate, self.min_ramp_rate, self.max_ramp_rate)?;
        check_range(
            "ramp_down_rate",
            config.ramp_down_rate,
            self.min_ramp_rate,
            self.max_ramp_rate,
        )?;
        check_range(
            "over_current_limit",
            config.over_current_limit,
            0.0,
            self.max_trip_time,
        )?;
        Ok(())
    }
}

/// Power-supply operations used by the test sequencer.
pub struct PowerSupplyController {
    device: HvDeviceInterface,
    limits: ControllerLimits,
}

impl PowerSupplyController {
    pub fn new(device: HvDeviceInterface) -> Self {
        Self::with_limits(device, ControllerLimits::default())
    }

    pub fn with_limits(device: HvDeviceInterface, limits: ControllerLimits) -> Self {
        Self { device, limits }
    }

    pub fn limits(&self) -> &ControllerLimits {
        &self.limits
    }

    pub fn connect(&mut self, port: &PortDescriptor) -> Result<()> {
        self.device.connect_to_psu(port)
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.device.disconnect_from_psu()
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_connected()
    }

    pub fn properties(&self) -> Option<&PowerSupplyProperties> {
        self.device.properties()
    }

    /// Direct access to the device interface for parameters not wrapped here.
    pub fn device_mut(&mut self) -> &mut HvDeviceInterface {
        &mut self.device
    }

    fn set_float_each(
        &mut self,
        parameter: FloatParameter,
        value: f64,
        channels: &[ChannelId],
    ) -> Result<()> {
        for channel in channels {
            self.device
                .set_parameters_float(parameter, value, std::slice::from_ref(channel))?;
        }
        Ok(())
    }

    fn set_long_each(
        &mut self,
        parameter: LongParameter,
        value: u32,
        channels: &[ChannelId],
    ) -> Result<()> {
        for channel in channels {
            self.device
                .set_parameters_long(parameter, value, std::slice::from_ref(channel))?;
        }
        Ok(())
    }

    // =========================================================================
    // Output control
    // =========================================================================

    #[instrument(skip(self), err)]
    pub fn power_on_channels(&mut self, channels: &[ChannelId]) -> Result<()> {
        ensure_channel_count(channels)?;
        self.set_long_each(LongParameter::Pw, 1, channels)?;
        info!("Channels powered on");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn power_off_channels(&mut self, channels: &[ChannelId]) -> Result<()> {
        ensure_channel_count(channels)?;
        self.set_long_each(LongParameter::Pw, 0, channels)?;
        info!("Channels powered off");
        Ok(())
    }

    /// Select kill (immediate) or ramp power-down for the channels.
    pub fn kill_channels_after_test(&mut self, channels: &[ChannelId], kill: bool) -> Result<()> {
        ensure_channel_count(channels)?;
        let mode = if kill { PDWN_KILL } else { PDWN_RAMP };
        self.set_long_each(LongParameter::PDwn, mode, channels)
    }

    pub fn set_power_down_method(
        &mut self,
        channels: &[ChannelId],
        method: PowerDownMethod,
    ) -> Result<()> {
        self.kill_channels_after_test(channels, method.is_kill())
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn set_test_voltages(&mut self, channels: &[ChannelId], voltage: f64) -> Result<()> {
        ensure_channel_count(channels)?;
        check_range("test_voltage", voltage, 0.0, self.limits.max_voltage)?;
        self.set_float_each(FloatParameter::VSet, voltage, channels)
    }

    pub fn set_current_limits(&mut self, channels: &[ChannelId], current_ua: f64) -> Result<()> {
        ensure_channel_count(channels)?;
        check_range("current_limit", current_ua, 0.0, self.limits.max_current_limit)?;
        self.set_float_each(FloatParameter::ISet, current_ua, channels)
    }

    pub fn set_max_voltages(&mut self, channels: &[ChannelId], voltage: f64) -> Result<()> {
        ensure_channel_count(channels)?;
        check_range("max_voltage", voltage, 0.0, self.limits.max_voltage)?;
        self.set_float_each(FloatParameter::MaxV, voltage, channels)
    }

    pub fn set_ramp_up_rate(&mut self, channels: &[ChannelId], rate: f64) -> Result<()> {
        ensure_channel_count(channels)?;
        check_range(
            "ramp_up_rate",
            rate,
            self.limits.min_ramp_rate,
            self.limits.max_ramp_rate,
        )?;
        self.set_float_each(FloatParameter::RUp, rate, channels)
    }

    pub fn set_ramp_down_rate(&mut self, channels: &[ChannelId], rate: f64) -> Result<()> {
        ensure_channel_count(channels)?;
        check_range(
            "ramp_down_rate",
            rate,
            self.limits.min_ramp_rate,
            self.limits.max_ramp_rate,
        )?;
        self.set_float_each(FloatParameter::RDwn, rate, channels)
    }

    /// Over-current trip time in seconds.
    pub fn set_over_current_limits(&mut self, channels: &[ChannelId], seconds: f64) -> Result<()> {
        ensure_channel_count(channels)?;
        check_range("over_current_limit", seconds, 0.0, self.limits.max_trip_time)?;
        self.set_float_each(FloatParameter::Trip, seconds, channels)
    }

    /// Apply every setting of `config` to `channels`.
    ///
    /// The whole configuration is validated before the first vendor call.
    #[instrument(skip(self, config), err)]
    pub fn apply_configuration(
        &mut self,
        channels: &[ChannelId],
        config: &TestConfiguration,
    ) -> Result<()> {
        ensure_channel_count(channels)?;
        self.limits.check_configuration(config)?;
        if channels.is_empty() {
            return Ok(());
        }

        self.set_test_voltages(channels, config.test_voltage)?;
        self.set_current_limits(channels, config.current_limit)?;
        self.set_max_voltages(channels, config.max_voltage)?;
        self.set_ramp_up_rate(channels, config.ramp_up_rate)?;
        self.set_ramp_down_rate(channels, config.ramp_down_rate)?;
        self.set_over_current_limits(channels, config.over_current_limit)?;
        self.set_power_down_method(channels, config.power_down_method)?;
        info!(
            test_voltage = config.test_voltage,
            method = ?config.power_down_method,
            "Applied test configuration"
        );
        Ok(())
    }

    /// Station defaults: 15 V, 2 µA, 4015 V ceiling, 15 V/s ramps,
    /// 1000 s trip time, ramp power-down.
    pub fn prepare_channels_for_testing(&mut self, channels: &[ChannelId]) -> Result<()> {
        self.apply_configuration(channels, &TestConfiguration::default())
    }

    // =========================================================================
    // Readings
    // =========================================================================

    /// Programmed operating voltages (V).
    pub fn read_test_voltages(&mut self, channels: &[ChannelId]) -> Result<Vec<f64>> {
        self.device.get_parameters_float(FloatParameter::VSet, channels)
    }

    /// Monitored voltages (V).
    pub fn read_voltages(&mut self, channels: &[ChannelId]) -> Result<Vec<f64>> {
        self.device.get_parameters_float(FloatParameter::VMon, channels)
    }

    /// Raw monitored currents (µA); callers scale to nA.
    pub fn read_currents(&mut self, channels: &[ChannelId]) -> Result<Vec<f64>> {
        self.device.get_parameters_float(FloatParameter::IMonH, channels)
    }

    pub fn read_polarities(&mut self, channels: &[ChannelId]) -> Result<Vec<Polarity>> {
        let raw = self.device.get_parameters_long(LongParameter::Polarity, channels)?;
        Ok(raw.into_iter().map(Polarity::from_raw).collect())
    }

    /// Raw `ChStatus` bitfields.
    pub fn read_statuses(&mut self, channels: &[ChannelId]) -> Result<Vec<u32>> {
        let statuses = self.device.get_parameters_long(LongParameter::ChStatus, channels)?;
        debug!(?channels, ?statuses, "Read channel statuses");
        Ok(statuses)
    }

    pub fn read_current_ranges(&mut self, channels: &[ChannelId]) -> Result<Vec<CurrentRange>> {
        let raw = self.device.get_parameters_long(LongParameter::ImonRange, channels)?;
        Ok(raw.into_iter().map(CurrentRange::from_raw).collect())
    }

    // =========================================================================
    // Board
    // =========================================================================

    pub fn check_alarm(&mut self) -> Result<bool> {
        self.device.check_alarm()
    }

    pub fn clear_alarm(&mut self) -> Result<()> {
        self.device.clear_alarm()
    }

    pub fn check_interlock(&mut self) -> Result<bool> {
        self.device.check_interlock()
    }

    pub fn set_interlock(&mut self, enabled: bool) -> Result<()> {
        self.device.set_interlock(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCall, SimulatedHvLibrary};
    use smdt_core::error::ValidationError;

    fn ch(raw: &[u8]) -> Vec<ChannelId> {
        raw.iter().map(|&c| ChannelId::new(c).unwrap()).collect()
    }

    fn controller() -> (PowerSupplyController, SimulatedHvLibrary) {
        let sim = SimulatedHvLibrary::new().with_polarity(2, 1);
        let mut controller = PowerSupplyController::new(HvDeviceInterface::new(Box::new(sim.clone())));
        controller.connect(&PortDescriptor::new("ttyACM0")).unwrap();
        sim.clear_calls();
        (controller, sim)
    }

    fn sets_of(sim: &SimulatedHvLibrary, parameter: &str) -> Vec<Vec<u16>> {
        sim.calls()
            .into_iter()
            .filter_map(|call| match call {
                SimCall::Set {
                    parameter: p,
                    channels,
                    ..
                } if p == parameter => Some(channels),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_channel_lists_up_to_four_accepted() {
        let (mut psu, _sim) = controller();
        let lists: [&[u8]; 4] = [&[0], &[0, 1], &[0, 1, 2], &[0, 1, 2, 3]];
        for list in lists {
            assert!(psu.power_on_channels(&ch(list)).is_ok());
        }
    }

    #[test]
    fn test_five_channels_rejected_before_hardware() {
        let (mut psu, sim) = controller();
        let err = psu.power_on_channels(&ch(&[0, 1, 2, 3, 0])).unwrap_err();
        assert!(err.is_validation());
        let err = psu.read_currents(&ch(&[0, 1, 2, 3, 3])).unwrap_err();
        assert!(err.is_validation());
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_voltage_range_validation() {
        let (mut psu, sim) = controller();
        let max = psu.limits().max_voltage;
        assert!(psu.set_test_voltages(&ch(&[0]), 0.0).is_ok());
        assert!(psu.set_test_voltages(&ch(&[0]), max).is_ok());
        sim.clear_calls();

        let err = psu.set_test_voltages(&ch(&[0]), -1.0).unwrap_err();
        assert!(matches!(
            err,
            crate::HvError::Validation(ValidationError::OutOfRange { .. })
        ));
        assert!(psu.set_test_voltages(&ch(&[0]), max + 1.0).is_err());
        assert!(psu.set_test_voltages(&ch(&[0]), f64::NAN).is_err());
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_ramp_rate_minimum() {
        let (mut psu, _sim) = controller();
        assert!(psu.set_ramp_up_rate(&ch(&[1]), 0.5).is_err());
        assert!(psu.set_ramp_up_rate(&ch(&[1]), 1.0).is_ok());
        assert!(psu.set_ramp_down_rate(&ch(&[1]), 0.0).is_err());
    }

    #[test]
    fn test_sets_are_issued_per_channel() {
        let (mut psu, sim) = controller();
        psu.set_test_voltages(&ch(&[0, 2, 3]), 50.0).unwrap();
        assert_eq!(sets_of(&sim, "VSet"), vec![vec![0], vec![2], vec![3]]);
        assert_eq!(sim.channel(2).unwrap().vset, 50.0);
    }

    #[test]
    fn test_reads_are_batched() {
        let (mut psu, sim) = controller();
        psu.power_on_channels(&ch(&[0, 1])).unwrap();
        sim.clear_calls();
        let currents = psu.read_currents(&ch(&[0, 1])).unwrap();
        assert_eq!(currents.len(), 2);
        assert_eq!(
            sim.calls(),
            vec![SimCall::Get {
                parameter: "IMonH".to_string(),
                channels: vec![0, 1],
            }]
        );
    }

    #[test]
    fn test_read_polarities_and_statuses() {
        let (mut psu, _sim) = controller();
        let polarities = psu.read_polarities(&ChannelId::all()).unwrap();
        assert_eq!(
            polarities,
            vec![
                Polarity::Normal,
                Polarity::Normal,
                Polarity::Reverse,
                Polarity::Normal
            ]
        );
        psu.power_on_channels(&ch(&[3])).unwrap();
        assert_eq!(psu.read_statuses(&ch(&[0, 3])).unwrap(), vec![0, 1]);
        assert_eq!(
            psu.read_current_ranges(&ch(&[0])).unwrap(),
            vec![CurrentRange::High]
        );
    }

    #[test]
    fn test_apply_configuration_power_down_method() {
        let (mut psu, sim) = controller();
        let kill = TestConfiguration {
            power_down_method: PowerDownMethod::Kill,
            ..Default::default()
        };
        psu.apply_configuration(&ch(&[0, 1]), &kill).unwrap();
        assert_eq!(sim.channel(0).unwrap().pdwn, PDWN_KILL);
        assert_eq!(sim.channel(1).unwrap().pdwn, PDWN_KILL);

        psu.prepare_channels_for_testing(&ch(&[1])).unwrap();
        let prepared = sim.channel(1).unwrap();
        assert_eq!(prepared.pdwn, PDWN_RAMP);
        assert_eq!(prepared.vset, 15.0);
        assert_eq!(prepared.trip, 1000.0);
    }

    #[test]
    fn test_apply_configuration_validates_everything_first() {
        let (mut psu, sim) = controller();
        let bad = TestConfiguration {
            over_current_limit: 5000.0,
            ..Default::default()
        };
        assert!(psu.apply_configuration(&ch(&[0]), &bad).is_err());
        assert!(sim.calls().is_empty());
    }
}
