//! Execution of one test run.
//!
//! A [`TestWorker`] runs as its own task. It holds the hardware mutex for the
//! whole run, owns the relay board, and reports only through its event
//! sender. The orchestrator reaches it solely through the [`CancelFlag`].
//!
//! # Normal run
//!
//! ```text
//! reset ─▶ polarity ─▶ offset calibration ─▶ per-tube scan ─▶ shutdown
//! ```
//!
//! # Reverse run
//!
//! ```text
//! reset ─▶ polarity ─▶ connect all ─▶ power on ─▶ wait for stop ─▶ shutdown
//! ```
//!
//! Shutdown (disconnect every position, power off, ramp-down wait) runs on
//! every exit path once the relay board is open. `Completed` is always the
//! last event.

use crate::connector::RelayConnector;
use crate::error::{Result, SequencerError};
use crate::events::{RunEvent, RunId, RunOutcome};
use chrono::Utc;
use smdt_core::cancel::CancelFlag;
use smdt_core::channel::{ChannelId, TestMode};
use smdt_core::parameters::{TestConfiguration, TestParameters};
use smdt_core::port::PortDescriptor;
use smdt_core::sample::{ChannelStatusReport, TubeDataSample};
use smdt_driver_caen::PowerSupplyController;
use smdt_driver_relay::RelayProtocolDriver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Hardware shared between the orchestrator and its runs.
pub type SharedController = Arc<Mutex<PowerSupplyController>>;

const TICK: Duration = Duration::from_secs(1);
const REVERSE_POLL: Duration = Duration::from_millis(100);

/// Vendor currents are µA; published currents are nA.
const UA_TO_NA: f64 = 1000.0;

/// Everything a run needs to know, fixed at start.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    /// Polarity under test
    pub mode: TestMode,
    /// Channels under test, in the order readings are reported
    pub channels: Vec<ChannelId>,
    /// Timing and panel layout
    pub parameters: TestParameters,
    /// Supply settings of the polarity under test
    pub configuration: TestConfiguration,
    /// Serial port of the relay board, opened when the run starts
    pub relay_port: PortDescriptor,
}

/// One run on the shared hardware, consumed by [`TestWorker::run`].
pub struct TestWorker {
    ctx: RunContext,
    hardware: SharedController,
    connector: Arc<dyn RelayConnector>,
    events: mpsc::UnboundedSender<RunEvent>,
    cancel: CancelFlag,
}

impl TestWorker {
    /// Prepare a run. Nothing touches the hardware until [`TestWorker::run`].
    pub fn new(
        ctx: RunContext,
        hardware: SharedController,
        connector: Arc<dyn RelayConnector>,
        events: mpsc::UnboundedSender<RunEvent>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            ctx,
            hardware,
            connector,
            events,
            cancel,
        }
    }

    /// Execute the run to completion and publish its outcome.
    #[instrument(skip(self), fields(run_id = self.ctx.run_id, mode = %self.ctx.mode))]
    pub async fn run(self) -> RunOutcome {
        let mut psu = self.hardware.lock().await;
        let started = Instant::now();
        info!(channels = ?self.ctx.channels, "Run acquired hardware");

        let outcome = match self.connector.open(&self.ctx.relay_port).await {
            Ok(mut relay) => self.execute(&mut psu, &mut relay, started).await,
            Err(e) => {
                error!(error = %e, "Relay board unavailable");
                RunOutcome::Failed(SequencerError::from(e).to_string())
            }
        };
        drop(psu);

        info!(%outcome, "Run completed");
        self.emit(RunEvent::Completed {
            run_id: self.ctx.run_id,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn execute(
        &self,
        psu: &mut PowerSupplyController,
        relay: &mut RelayProtocolDriver,
        started: Instant,
    ) -> RunOutcome {
        let result = match self.ctx.mode {
            TestMode::Normal => self.run_normal(psu, relay, started).await,
            TestMode::Reverse => self.run_reverse(psu, relay).await,
        };

        let relay_usable = match &result {
            Err(e) => {
                error!(error = %e, class = %e.class(), "Run aborted");
                !e.relay_unusable()
            }
            Ok(_) => true,
        };
        self.shutdown(psu, relay, relay_usable).await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(e.to_string()),
        }
    }

    // =========================================================================
    // Programs
    // =========================================================================

    async fn run_normal(
        &self,
        psu: &mut PowerSupplyController,
        relay: &mut RelayProtocolDriver,
        started: Instant,
    ) -> Result<RunOutcome> {
        self.reset(relay).await?;
        self.publish_polarities(psu);
        if self.cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        let offsets = self.calibrate_offsets(psu).await?;

        for index in 0..self.ctx.parameters.tubes_per_channel {
            if self.cancel.is_cancelled() {
                break;
            }

            let mut samples = Vec::with_capacity(self.ctx.channels.len());
            for &channel in &self.ctx.channels {
                if self.cancel.is_cancelled() {
                    break;
                }
                relay.connect_tube(self.position(channel, index)).await?;
                debug!(channel = %channel, tube = index, "Tube connected");
                samples.push(TubeDataSample::connected(channel, index));
            }

            self.dwell(psu, &mut samples, &offsets, index, started).await;

            for sample in &mut samples {
                relay
                    .disconnect_tube(self.position(sample.channel, sample.tube))
                    .await?;
                sample.is_active = false;
                sample.timestamp = Utc::now();
                self.emit(RunEvent::TubeData(sample.clone()));
            }
        }

        if self.cancel.is_cancelled() {
            Ok(RunOutcome::Cancelled)
        } else {
            Ok(RunOutcome::Finished)
        }
    }

    /// Reverse runs end only when stopped; a stop is their normal finish.
    /// A stop that arrives before the panel is energized cancels the run.
    async fn run_reverse(
        &self,
        psu: &mut PowerSupplyController,
        relay: &mut RelayProtocolDriver,
    ) -> Result<RunOutcome> {
        self.reset(relay).await?;
        self.publish_polarities(psu);
        if self.cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        for &channel in &self.ctx.channels {
            for index in 0..self.ctx.parameters.tubes_per_channel {
                if self.cancel.is_cancelled() {
                    return Ok(RunOutcome::Cancelled);
                }
                relay.connect_tube(self.position(channel, index)).await?;
            }
        }
        if self.cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        psu.power_on_channels(&self.ctx.channels)?;
        info!("All tubes energized, waiting for stop");

        while !self.cancel.is_cancelled() {
            sleep(REVERSE_POLL).await;
        }
        Ok(RunOutcome::Finished)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    fn position(&self, channel: ChannelId, index: u32) -> u32 {
        self.ctx.parameters.tube_position(channel.get(), index)
    }

    async fn disconnect_all(&self, relay: &mut RelayProtocolDriver) -> Result<()> {
        for &channel in &self.ctx.channels {
            for index in 0..self.ctx.parameters.tubes_per_channel {
                relay.disconnect_tube(self.position(channel, index)).await?;
            }
        }
        Ok(())
    }

    /// Bring the relay board to a known state.
    async fn reset(&self, relay: &mut RelayProtocolDriver) -> Result<()> {
        self.disconnect_all(relay).await?;
        debug!("Relay board reset");
        Ok(())
    }

    fn publish_polarities(&self, psu: &mut PowerSupplyController) {
        match psu.read_polarities(&self.ctx.channels) {
            Ok(polarities) => {
                for (&channel, polarity) in self.ctx.channels.iter().zip(polarities) {
                    self.emit(RunEvent::Polarity { channel, polarity });
                }
            }
            Err(e) => warn!(error = %e, "Polarity read failed"),
        }
    }

    /// Measure each channel's intrinsic current at zero volts (nA).
    ///
    /// Leaves the channels powered at their programmed voltages.
    #[instrument(skip_all, err)]
    async fn calibrate_offsets(&self, psu: &mut PowerSupplyController) -> Result<Vec<f64>> {
        let channels = &self.ctx.channels;
        let programmed = psu.read_test_voltages(channels)?;

        psu.set_test_voltages(channels, 0.0)?;
        psu.power_on_channels(channels)?;
        sleep(self.ctx.parameters.settle_for_testing_voltage()).await;

        let offsets = match psu.read_currents(channels) {
            Ok(raw) => raw.into_iter().map(|ua| ua * UA_TO_NA).collect(),
            Err(e) => {
                warn!(error = %e, "Offset read failed, using zero offsets");
                vec![0.0; channels.len()]
            }
        };

        for (channel, &voltage) in channels.iter().zip(&programmed) {
            psu.set_test_voltages(std::slice::from_ref(channel), voltage)?;
        }
        sleep(self.ctx.configuration.ramp_up_time()).await;

        info!(?offsets, "Offset calibration complete");
        Ok(offsets)
    }

    /// Sample the connected tubes once a second for the dwell of tube `index`.
    ///
    /// Time info counts from the start of the run; the remaining time covers
    /// the rest of the scan.
    async fn dwell(
        &self,
        psu: &mut PowerSupplyController,
        samples: &mut [TubeDataSample],
        offsets: &[f64],
        index: u32,
        started: Instant,
    ) {
        let per_tube = u64::from(self.ctx.parameters.seconds_per_tube);
        let tubes_left = u64::from(self.ctx.parameters.tubes_per_channel - index);
        for second in 0..per_tube {
            if self.cancel.is_cancelled() {
                break;
            }
            self.tick(psu, samples, offsets);
            let remaining = tubes_left * per_tube - second - 1;
            self.emit(RunEvent::time_info(started.elapsed().as_secs(), remaining));
            sleep(TICK).await;
        }
    }

    /// One sampling tick. Read failures keep the previous values.
    fn tick(
        &self,
        psu: &mut PowerSupplyController,
        samples: &mut [TubeDataSample],
        offsets: &[f64],
    ) {
        let channels = &self.ctx.channels;
        let currents = psu.read_currents(channels);
        let voltages = psu.read_voltages(channels);
        let statuses = psu.read_statuses(channels);
        let now = Utc::now();

        match currents {
            Ok(currents) => {
                for ((sample, raw), offset) in samples.iter_mut().zip(currents).zip(offsets) {
                    sample.current_na = raw * UA_TO_NA - offset;
                }
            }
            Err(e) => warn!(error = %e, "Current read failed"),
        }
        match voltages {
            Ok(voltages) => {
                for (sample, voltage) in samples.iter_mut().zip(voltages) {
                    sample.voltage = voltage;
                }
            }
            Err(e) => warn!(error = %e, "Voltage read failed"),
        }

        for sample in samples.iter_mut() {
            sample.timestamp = now;
            self.emit(RunEvent::TubeData(sample.clone()));
        }

        match statuses {
            Ok(statuses) => {
                for (&channel, raw) in channels.iter().zip(statuses) {
                    let report = ChannelStatusReport::decode(channel, raw);
                    if report.flags().is_fault() {
                        warn!(channel = %channel, status = ?report.tokens, "Channel fault");
                    }
                    self.emit(RunEvent::ChannelStatus(report));
                }
            }
            Err(e) => warn!(error = %e, "Status read failed"),
        }
    }

    async fn shutdown(
        &self,
        psu: &mut PowerSupplyController,
        relay: &mut RelayProtocolDriver,
        relay_usable: bool,
    ) {
        if relay_usable {
            if let Err(e) = self.disconnect_all(relay).await {
                error!(error = %e, "Failed to disconnect tubes during shutdown");
            }
        }
        if let Err(e) = psu.power_off_channels(&self.ctx.channels) {
            error!(error = %e, "Failed to power off channels during shutdown");
        }
        sleep(self.ctx.configuration.ramp_down_time()).await;
    }

    fn emit(&self, event: RunEvent) {
        // The orchestrator outlives its runs; a closed channel means it is gone
        let _ = self.events.send(event);
    }
}
