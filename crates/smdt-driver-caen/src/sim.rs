//! In-process stand-in for the vendor library.
//!
//! `SimulatedHvLibrary` keeps four channels of supply state, ramps
//! instantly, and derives monitored current from a per-channel leakage plus a
//! load conductance, so offset calibration has something to subtract. Clones
//! share state, which lets a test keep a handle for inspection while the
//! device interface owns another.
//!
//! Failure injection follows the mock drivers' scenario style:
//!
//! ```rust
//! use smdt_driver_caen::sim::{FailureScenario, SimulatedHvLibrary};
//!
//! let sim = SimulatedHvLibrary::new();
//! sim.inject(FailureScenario::FailNext { parameter: "IMonH", count: 2 });
//! ```

use crate::library::{HvLibrary, LinkType, SlotInfo, SystemType, VendorCode};
use parking_lot::Mutex;
use smdt_core::channel::CHANNEL_COUNT;
use std::sync::Arc;

const ERR_GENERIC: VendorCode = VendorCode(0x1);
const ERR_NOT_CONNECTED: VendorCode = VendorCode(0x5);
const ERR_PARAMETER: VendorCode = VendorCode(0x12);
const ERR_CHANNEL: VendorCode = VendorCode(0x13);

/// Injected failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureScenario {
    /// `InitSystem` fails
    RejectConnection,
    /// The next `count` calls touching `parameter` fail
    FailNext { parameter: &'static str, count: u32 },
    /// Calls touching `parameter` fail after `count` successes
    FailAfterN { parameter: &'static str, count: u32 },
}

/// A call received by the simulator, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Init { connection: String },
    Deinit,
    CrateMap,
    Get { parameter: String, channels: Vec<u16> },
    Set { parameter: String, channels: Vec<u16>, value: f64 },
    GetBoard { parameter: String },
    SetBoard { parameter: String, value: u32 },
}

/// State of one simulated channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SimChannel {
    pub vset: f32,
    pub iset: f32,
    pub maxv: f32,
    pub rup: f32,
    pub rdwn: f32,
    pub trip: f32,
    pub pdwn: u32,
    pub power: bool,
    pub polarity: u32,
    pub imon_range: u32,
    /// Current drawn at zero volts (µA)
    pub leakage_ua: f32,
    /// Additional current per volt (µA/V)
    pub conductance_ua_per_v: f32,
    /// Status bits reported on top of ON
    pub extra_status: u32,
}

impl Default for SimChannel {
    fn default() -> Self {
        Self {
            vset: 0.0,
            iset: 2.0,
            maxv: 4015.0,
            rup: 50.0,
            rdwn: 50.0,
            trip: 10.0,
            pdwn: 1,
            power: false,
            polarity: 0,
            imon_range: 0,
            leakage_ua: 0.002,
            conductance_ua_per_v: 0.0001,
            extra_status: 0,
        }
    }
}

impl SimChannel {
    fn vmon(&self) -> f32 {
        if self.power {
            self.vset.min(self.maxv)
        } else {
            0.0
        }
    }

    fn imon(&self) -> f32 {
        if self.power {
            self.leakage_ua + self.vmon() * self.conductance_ua_per_v
        } else {
            0.0
        }
    }

    fn status(&self) -> u32 {
        u32::from(self.power) | self.extra_status
    }
}

#[derive(Debug)]
struct SimState {
    handle: Option<i32>,
    next_handle: i32,
    channels: [SimChannel; CHANNEL_COUNT],
    alarm: bool,
    interlock_mode: u32,
    scenarios: Vec<(FailureScenario, u32)>,
    calls: Vec<SimCall>,
    last_connection: Option<String>,
    last_error: String,
}

impl SimState {
    fn check_failure(&mut self, parameter: &str) -> Result<(), VendorCode> {
        for (scenario, seen) in self.scenarios.iter_mut() {
            match scenario {
                FailureScenario::FailNext { parameter: p, count } if *p == parameter => {
                    if *seen < *count {
                        *seen += 1;
                        self.last_error = format!("Simulated failure on {}", parameter);
                        return Err(ERR_GENERIC);
                    }
                }
                FailureScenario::FailAfterN { parameter: p, count } if *p == parameter => {
                    *seen += 1;
                    if *seen > *count {
                        self.last_error = format!(
                            "Simulated failure on {} after {} calls",
                            parameter, count
                        );
                        return Err(ERR_GENERIC);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_handle(&mut self, handle: i32) -> Result<(), VendorCode> {
        if self.handle != Some(handle) {
            self.last_error = "Device not connected".to_string();
            return Err(ERR_NOT_CONNECTED);
        }
        Ok(())
    }

    fn channel_mut(&mut self, channel: u16) -> Result<&mut SimChannel, VendorCode> {
        if usize::from(channel) >= CHANNEL_COUNT {
            self.last_error = format!("Channel {} does not exist", channel);
            return Err(ERR_CHANNEL);
        }
        Ok(&mut self.channels[usize::from(channel)])
    }

    fn unknown_parameter(&mut self, parameter: &str) -> VendorCode {
        self.last_error = format!("Parameter {} not found", parameter);
        ERR_PARAMETER
    }
}

/// Simulated four-channel desktop supply.
#[derive(Debug, Clone)]
pub struct SimulatedHvLibrary {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedHvLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHvLibrary {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                handle: None,
                next_handle: 1,
                channels: Default::default(),
                alarm: false,
                interlock_mode: 0,
                scenarios: Vec::new(),
                calls: Vec::new(),
                last_connection: None,
                last_error: String::new(),
            })),
        }
    }

    /// Set the raw polarity of a channel (0 normal).
    pub fn with_polarity(self, channel: usize, raw: u32) -> Self {
        if let Some(ch) = self.state.lock().channels.get_mut(channel) {
            ch.polarity = raw;
        }
        self
    }

    /// Set the zero-volt leakage of a channel (µA).
    pub fn with_leakage(self, channel: usize, leakage_ua: f32) -> Self {
        if let Some(ch) = self.state.lock().channels.get_mut(channel) {
            ch.leakage_ua = leakage_ua;
        }
        self
    }

    /// Set the load conductance of a channel (µA/V).
    pub fn with_conductance(self, channel: usize, ua_per_v: f32) -> Self {
        if let Some(ch) = self.state.lock().channels.get_mut(channel) {
            ch.conductance_ua_per_v = ua_per_v;
        }
        self
    }

    pub fn inject(&self, scenario: FailureScenario) {
        self.state.lock().scenarios.push((scenario, 0));
    }

    /// Latch the board alarm.
    pub fn raise_alarm(&self) {
        self.state.lock().alarm = true;
    }

    /// Report extra status bits on a channel (e.g. a trip).
    pub fn set_extra_status(&self, channel: usize, bits: u32) {
        if let Some(ch) = self.state.lock().channels.get_mut(channel) {
            ch.extra_status = bits;
        }
    }

    pub fn channel(&self, channel: usize) -> Option<SimChannel> {
        self.state.lock().channels.get(channel).cloned()
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn last_connection(&self) -> Option<String> {
        self.state.lock().last_connection.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().handle.is_some()
    }
}

impl HvLibrary for SimulatedHvLibrary {
    fn init_system(
        &mut self,
        _system: SystemType,
        _link: LinkType,
        connection: &str,
        _username: &str,
        _password: &str,
    ) -> Result<i32, VendorCode> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Init {
            connection: connection.to_string(),
        });
        if state
            .scenarios
            .iter()
            .any(|(s, _)| *s == FailureScenario::RejectConnection)
        {
            state.last_error = format!("Unable to open {}", connection);
            return Err(ERR_GENERIC);
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.handle = Some(handle);
        state.last_connection = Some(connection.to_string());
        Ok(handle)
    }

    fn deinit_system(&mut self, handle: i32) -> Result<(), VendorCode> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Deinit);
        state.check_handle(handle)?;
        state.handle = None;
        Ok(())
    }

    fn crate_map(&mut self, handle: i32) -> Result<Vec<SlotInfo>, VendorCode> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::CrateMap);
        state.check_handle(handle)?;
        Ok(vec![SlotInfo {
            slot: 0,
            model: "DT1471ET".to_string(),
            description: "Simulated 4 Ch 5.5 kV 20 uA".to_string(),
            channels: CHANNEL_COUNT as u16,
            serial: 4242,
            firmware_major: 1,
            firmware_minor: 4,
        }])
    }

    fn get_ch_param_float(
        &mut self,
        handle: i32,
        _slot: u16,
        parameter: &str,
        channels: &[u16],
    ) -> Result<Vec<f32>, VendorCode> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Get {
            parameter: parameter.to_string(),
            channels: channels.to_vec(),
        });
        state.check_handle(handle)?;
        state.check_failure(parameter)?;

        let mut values = Vec::with_capacity(channels.len());
        for &channel in channels {
            let ch = state.channel_mut(channel)?;
            let value = match parameter {
                "VSet" => ch.vset,
                "ISet" => ch.iset,
                "VMon" => ch.vmon(),
                "IMonH" | "IMonL" => ch.imon(),
                "MaxV" => ch.maxv,
                "RUp" => ch.rup,
                "RDwn" => ch.rdwn,
                "Trip" => ch.trip,
                _ => return Err(state.unknown_parameter(parameter)),
            };
            values.push(value);
        }
        Ok(values)
    }

    fn get_ch_param_long(
        &mut self,
        handle: i32,
        _slot: u16,
        parameter: &str,
        channels: &[u16],
    ) -> Result<Vec<u32>, VendorCode> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Get {
            parameter: parameter.to_string(),
            channels: channels.to_vec(),
        });
        state.check_handle(handle)?;
        state.check_failure(parameter)?;

        let mut values = Vec::with_capacity(channels.len());
        for &channel in channels {
            let ch = state.channel_mut(channel)?;
            let value = match parameter {
                "Pw" => u32::from(ch.power),
                "PDwn" => ch.pdwn,
                "Polarity" => ch.polarity,
                "ChStatus" => ch.status(),
                "ImonRange" => ch.imon_range,
                _ => return Err(state.unknown_parameter(parameter)),
            };
            values.push(value);
        }
        Ok(values)
    }

    fn set_ch_param_float(
        &mut self,
        handle: i32,
        _slot: u16,
        parameter: &str,
        channels: &[u16],
        value: f32,
    ) -> Result<(), VendorCode> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Set {
            parameter: parameter.to_string(),
            channels: channels.to_vec(),
            value: f64::from(value),
        });
        state.check_handle(handle)?;
        state.check_failure(parameter)?;

        for &channel in channels {
            let ch = state.channel_mut(channel)?;
            let field = match parameter {
                "VSet" => &mut ch.vset,
                "ISet" => &mut ch.iset,
                "MaxV" => &mut ch.maxv,
                "RUp" => &mut ch.rup,
                "RDwn" => &mut ch.rdwn,
                "Trip" => &mut ch.trip,
                _ => return Err(state.unknown_parameter(parameter)),
            };
            *field = value;
        }
        Ok(())
    }

    fn set_ch_param_long(
        &mut self,
        handle: i32,
        _slot: u16,
        parameter: &str,
        channels: &[u16],
        value: u32,
    ) -> Result<(), VendorCode> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Set {
            parameter: parameter.to_string(),
            channels: channels.to_vec(),
            value: f64::from(value),
        });
        state.check_handle(handle)?;
        state.check_failure(parameter)?;

        for &channel in channels {
            let ch = state.channel_mut(channel)?;
            match parameter {
                "Pw" => ch.power = value != 0,
                "PDwn" => ch.pdwn = value,
                "ImonRange" => ch.imon_range = value,
                _ => return Err(state.unknown_parameter(parameter)),
            }
        }
        Ok(())
    }

    fn get_bd_param_long(
        &mut self,
        handle: i32,
        _slot: u16,
        parameter: &str,
    ) -> Result<u32, VendorCode> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::GetBoard {
            parameter: parameter.to_string(),
        });
        state.check_handle(handle)?;
        state.check_failure(parameter)?;
        match parameter {
            "BdAlarm" => Ok(u32::from(state.alarm)),
            "BdIlk" => Ok(u32::from(state.interlock_mode != 0)),
            "BdIlkm" => Ok(state.interlock_mode),
            _ => Err(state.unknown_parameter(parameter)),
        }
    }

    fn set_bd_param_long(
        &mut self,
        handle: i32,
        _slot: u16,
        parameter: &str,
        value: u32,
    ) -> Result<(), VendorCode> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::SetBoard {
            parameter: parameter.to_string(),
            value,
        });
        state.check_handle(handle)?;
        state.check_failure(parameter)?;
        match parameter {
            "BdClrAlm" => {
                state.alarm = false;
                Ok(())
            }
            "BdIlkm" => {
                state.interlock_mode = value;
                Ok(())
            }
            _ => Err(state.unknown_parameter(parameter)),
        }
    }

    fn last_error(&self) -> String {
        self.state.lock().last_error.clone()
    }
}
