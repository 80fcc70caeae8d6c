//! Station-level control of test runs.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐  connect()   ┌───────────┐   start()   ┌─────────┐
//! │ Disconnected │─────────────▶│ Connected │────────────▶│ Running │
//! └──────────────┘              └─────┬─────┘             └────┬────┘
//!        ▲          disconnect()      │   finished / stopped   │
//!        └────────────────────────────┘◀───────────────────────┘
//! ```
//!
//! The orchestrator never blocks on a run. Commands return a success flag and
//! log the reason for a refusal; run output arrives through
//! [`TestOrchestrator::subscribe`].

use crate::connector::RelayConnector;
use crate::events::{RunEvent, RunId};
use crate::worker::{RunContext, SharedController, TestWorker};
use parking_lot::Mutex;
use smdt_core::cancel::CancelFlag;
use smdt_core::channel::{validate_run_channels, ChannelId, Polarity, TestMode};
use smdt_core::config::ChannelSets;
use smdt_core::parameters::{TestConfiguration, TestParameters};
use smdt_core::port::PortDescriptor;
use smdt_driver_caen::PowerSupplyController;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

const EVENT_CAPACITY: usize = 1024;

/// Where the station is in its lifecycle, see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No supply connection
    Disconnected,
    /// Supply open and idle
    Connected,
    /// A run holds the slot
    Running,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Disconnected => write!(f, "Disconnected"),
            OrchestratorState::Connected => write!(f, "Connected"),
            OrchestratorState::Running => write!(f, "Running"),
        }
    }
}

struct ActiveRun {
    run_id: RunId,
    cancel: CancelFlag,
    /// Dropping the handle detaches the task; runs are never aborted.
    _task: JoinHandle<()>,
}

#[derive(Default)]
struct Session {
    connected: bool,
    relay_port: Option<PortDescriptor>,
    parameters: TestParameters,
    normal: Option<TestConfiguration>,
    reverse: Option<TestConfiguration>,
    channels: ChannelSets,
}

impl Session {
    fn configuration(&self, mode: TestMode) -> Option<TestConfiguration> {
        match mode {
            TestMode::Normal => self.normal,
            TestMode::Reverse => self.reverse,
        }
    }
}

/// Entry point for driving the test station.
pub struct TestOrchestrator {
    hardware: SharedController,
    connector: Arc<dyn RelayConnector>,
    publisher: broadcast::Sender<RunEvent>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    session: Mutex<Session>,
    next_run_id: AtomicU64,
}

impl TestOrchestrator {
    /// Wrap a supply controller (not yet connected) and a relay connector.
    pub fn new(controller: PowerSupplyController, connector: Arc<dyn RelayConnector>) -> Self {
        let (publisher, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            hardware: Arc::new(tokio::sync::Mutex::new(controller)),
            connector,
            publisher,
            active: Arc::new(Mutex::new(None)),
            session: Mutex::new(Session::default()),
            next_run_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to run events. Lagging subscribers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.publisher.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OrchestratorState {
        if self.active.lock().is_some() {
            OrchestratorState::Running
        } else if self.session.lock().connected {
            OrchestratorState::Connected
        } else {
            OrchestratorState::Disconnected
        }
    }

    fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Open the supply and remember the relay port for later runs.
    #[instrument(skip_all, fields(psu = %psu_port, relay = %relay_port))]
    pub async fn connect(&self, psu_port: &PortDescriptor, relay_port: &PortDescriptor) -> bool {
        if self.is_running() {
            warn!("Cannot connect while a run is active");
            return false;
        }

        let mut psu = self.hardware.lock().await;
        if let Err(e) = psu.connect(psu_port) {
            error!(error = %e, "Power supply connection failed");
            return false;
        }
        if let Some(properties) = psu.properties() {
            info!(
                model = %properties.model,
                serial = properties.serial,
                firmware = %properties.firmware,
                "Power supply connected"
            );
        }

        let mut session = self.session.lock();
        session.connected = true;
        session.relay_port = Some(relay_port.clone());
        true
    }

    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> bool {
        if self.is_running() {
            warn!("Cannot disconnect while a run is active");
            return false;
        }

        let mut psu = self.hardware.lock().await;
        if let Err(e) = psu.disconnect() {
            error!(error = %e, "Power supply disconnect failed");
            return false;
        }

        let mut session = self.session.lock();
        session.connected = false;
        session.normal = None;
        session.reverse = None;
        info!("Station disconnected");
        true
    }

    /// Replace the timing used by subsequent runs.
    pub fn set_test_parameters(&self, parameters: TestParameters) -> bool {
        if let Err(e) = parameters.validate() {
            warn!(error = %e, "Rejected test parameters");
            return false;
        }
        self.session.lock().parameters = parameters;
        info!(?parameters, "Test parameters updated");
        true
    }

    /// Sort the four channels by polarity and program each group with its
    /// configuration.
    #[instrument(skip_all)]
    pub async fn initialize_test_configuration(
        &self,
        normal: TestConfiguration,
        reverse: TestConfiguration,
    ) -> bool {
        if self.state() != OrchestratorState::Connected {
            warn!(state = %self.state(), "Configuration requires a connected, idle station");
            return false;
        }
        for (mode, config) in [(TestMode::Normal, &normal), (TestMode::Reverse, &reverse)] {
            if let Err(e) = config.validate() {
                warn!(%mode, error = %e, "Rejected test configuration");
                return false;
            }
        }

        let mut psu = self.hardware.lock().await;
        let all = ChannelId::all();
        let polarities = match psu.read_polarities(&all) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Polarity read failed");
                return false;
            }
        };

        let mut sets = ChannelSets::default();
        for (&channel, polarity) in all.iter().zip(polarities) {
            match polarity {
                Polarity::Normal => sets.normal.push(channel),
                Polarity::Reverse => sets.reverse.push(channel),
            }
        }

        for (mode, config) in [(TestMode::Normal, &normal), (TestMode::Reverse, &reverse)] {
            let channels = sets.for_mode(mode);
            if let Err(e) = psu.apply_configuration(channels, config) {
                error!(%mode, ?channels, error = %e, "Failed to apply test configuration");
                return false;
            }
        }
        drop(psu);

        info!(normal = ?sets.normal, reverse = ?sets.reverse, "Test configuration initialized");
        let mut session = self.session.lock();
        session.normal = Some(normal);
        session.reverse = Some(reverse);
        session.channels = sets;
        true
    }

    /// Channels routed to `mode` by the last configuration.
    pub fn configured_channels(&self, mode: TestMode) -> Vec<ChannelId> {
        self.session.lock().channels.for_mode(mode).to_vec()
    }

    /// Read one channel's polarity, unless a run holds the hardware.
    pub fn channel_polarity(&self, channel: ChannelId) -> Option<Polarity> {
        if !self.session.lock().connected {
            warn!(%channel, "Polarity requested while disconnected");
            return None;
        }
        let Ok(mut psu) = self.hardware.try_lock() else {
            warn!(%channel, "Polarity unavailable while a run holds the hardware");
            return None;
        };
        match psu.read_polarities(std::slice::from_ref(&channel)) {
            Ok(polarities) => polarities.into_iter().next(),
            Err(e) => {
                warn!(%channel, error = %e, "Polarity read failed");
                None
            }
        }
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Start a run, superseding any active one.
    ///
    /// The superseded run is cancelled and unwinds through its shutdown; the
    /// new run starts once it has released the hardware.
    #[instrument(skip_all, fields(?channels, %mode))]
    pub fn start(&self, channels: &[ChannelId], mode: TestMode) -> bool {
        if let Err(e) = validate_run_channels(channels) {
            warn!(error = %e, "Rejected run channels");
            return false;
        }

        let ctx = {
            let session = self.session.lock();
            if !session.connected {
                warn!("Cannot start a run while disconnected");
                return false;
            }
            let (Some(configuration), Some(relay_port)) =
                (session.configuration(mode), session.relay_port.clone())
            else {
                warn!("Cannot start a run before the test configuration is initialized");
                return false;
            };
            let configured = session.channels.for_mode(mode);
            if let Some(other) = channels.iter().find(|c| !configured.contains(*c)) {
                warn!(channel = %other, "Channel is not configured for this mode");
            }
            RunContext {
                run_id: self.next_run_id.fetch_add(1, Ordering::Relaxed),
                mode,
                channels: channels.to_vec(),
                parameters: session.parameters,
                configuration,
                relay_port,
            }
        };
        let run_id = ctx.run_id;

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            info!(previous = previous.run_id, "Superseding active run");
            previous.cancel.cancel(format!("superseded by run {}", run_id));
        }

        let cancel = CancelFlag::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = TestWorker::new(
            ctx,
            self.hardware.clone(),
            self.connector.clone(),
            tx,
            cancel.clone(),
        );

        tokio::spawn(forward_events(rx, self.publisher.clone(), self.active.clone()));
        let task = tokio::spawn(async move {
            worker.run().await;
        });

        *active = Some(ActiveRun {
            run_id,
            cancel,
            _task: task,
        });
        info!(run_id, "Run started");
        true
    }

    /// Request cancellation of the active run. Returns immediately.
    pub fn stop(&self) {
        let active = self.active.lock();
        match active.as_ref() {
            Some(run) if !run.cancel.is_cancelled() => {
                info!(run_id = run.run_id, "Stop requested");
                run.cancel.cancel("stop requested");
            }
            _ => {}
        }
    }
}

/// Relay one run's events to subscribers and release the run slot when it
/// completes.
async fn forward_events(
    mut rx: mpsc::UnboundedReceiver<RunEvent>,
    publisher: broadcast::Sender<RunEvent>,
    active: Arc<Mutex<Option<ActiveRun>>>,
) {
    while let Some(event) = rx.recv().await {
        if let RunEvent::Completed { run_id, .. } = &event {
            let mut slot = active.lock();
            if slot.as_ref().is_some_and(|run| run.run_id == *run_id) {
                *slot = None;
            }
        }
        // No subscribers is fine
        let _ = publisher.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smdt_driver_caen::sim::SimulatedHvLibrary;
    use smdt_driver_caen::HvDeviceInterface;
    use smdt_driver_relay::RelayError;

    struct NoBoard;

    #[async_trait::async_trait]
    impl RelayConnector for NoBoard {
        async fn open(
            &self,
            port: &PortDescriptor,
        ) -> smdt_driver_relay::Result<smdt_driver_relay::RelayProtocolDriver> {
            Err(RelayError::Open {
                port: port.port.clone(),
                message: "absent".into(),
            })
        }
    }

    fn orchestrator(sim: &SimulatedHvLibrary) -> TestOrchestrator {
        let psu = PowerSupplyController::new(HvDeviceInterface::new(Box::new(sim.clone())));
        TestOrchestrator::new(psu, Arc::new(NoBoard))
    }

    fn ports() -> (PortDescriptor, PortDescriptor) {
        (PortDescriptor::new("psu"), PortDescriptor::new("relay"))
    }

    #[tokio::test]
    async fn commands_follow_state_machine() {
        let sim = SimulatedHvLibrary::new();
        let orch = orchestrator(&sim);
        let (psu, relay) = ports();
        let ch0 = [ChannelId::new(0).unwrap()];

        assert_eq!(orch.state(), OrchestratorState::Disconnected);
        assert!(!orch.start(&ch0, TestMode::Normal));
        assert!(
            !orch
                .initialize_test_configuration(TestConfiguration::default(), TestConfiguration::default())
                .await
        );

        assert!(orch.connect(&psu, &relay).await);
        assert_eq!(orch.state(), OrchestratorState::Connected);
        // Not configured yet
        assert!(!orch.start(&ch0, TestMode::Normal));

        assert!(orch.disconnect().await);
        assert_eq!(orch.state(), OrchestratorState::Disconnected);
        assert!(!sim.is_open());
    }

    #[tokio::test]
    async fn configuration_routes_channels_by_polarity() {
        let sim = SimulatedHvLibrary::new().with_polarity(2, 1).with_polarity(3, 1);
        let orch = orchestrator(&sim);
        let (psu, relay) = ports();
        assert!(orch.connect(&psu, &relay).await);

        let normal = TestConfiguration::default();
        let reverse = TestConfiguration {
            test_voltage: 30.0,
            power_down_method: smdt_core::parameters::PowerDownMethod::Kill,
            ..TestConfiguration::default()
        };
        assert!(orch.initialize_test_configuration(normal, reverse).await);

        let ids = |raw: &[u8]| -> Vec<ChannelId> {
            raw.iter().map(|&c| ChannelId::new(c).unwrap()).collect()
        };
        assert_eq!(orch.configured_channels(TestMode::Normal), ids(&[0, 1]));
        assert_eq!(orch.configured_channels(TestMode::Reverse), ids(&[2, 3]));

        let ch0 = sim.channel(0).unwrap();
        let ch3 = sim.channel(3).unwrap();
        assert_eq!(ch0.vset, 15.0);
        assert_eq!(ch0.pdwn, 1);
        assert_eq!(ch3.vset, 30.0);
        assert_eq!(ch3.pdwn, 0);
    }

    #[tokio::test]
    async fn invalid_inputs_are_refused() {
        let sim = SimulatedHvLibrary::new();
        let orch = orchestrator(&sim);
        let (psu, relay) = ports();
        assert!(orch.connect(&psu, &relay).await);

        assert!(!orch.set_test_parameters(TestParameters::new(0, 8, 1)));
        assert!(orch.set_test_parameters(TestParameters::new(1, 2, 0)));

        let bad = TestConfiguration {
            test_voltage: 5000.0,
            ..TestConfiguration::default()
        };
        assert!(
            !orch
                .initialize_test_configuration(bad, TestConfiguration::default())
                .await
        );

        assert!(orch
            .initialize_test_configuration(TestConfiguration::default(), TestConfiguration::default())
            .await);
        assert!(!orch.start(&[], TestMode::Normal));
        let dup = [ChannelId::new(1).unwrap(), ChannelId::new(1).unwrap()];
        assert!(!orch.start(&dup, TestMode::Normal));
    }

    #[tokio::test]
    async fn stop_without_run_is_noop() {
        let sim = SimulatedHvLibrary::new();
        let orch = orchestrator(&sim);
        let mut rx = orch.subscribe();

        orch.stop();
        orch.stop();

        assert_eq!(orch.state(), OrchestratorState::Disconnected);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn polarity_query_uses_idle_hardware() {
        let sim = SimulatedHvLibrary::new().with_polarity(1, 1);
        let orch = orchestrator(&sim);
        let ch1 = ChannelId::new(1).unwrap();
        assert_eq!(orch.channel_polarity(ch1), None);

        let (psu, relay) = ports();
        assert!(orch.connect(&psu, &relay).await);
        assert_eq!(orch.channel_polarity(ch1), Some(Polarity::Reverse));
        assert_eq!(
            orch.channel_polarity(ChannelId::new(0).unwrap()),
            Some(Polarity::Normal)
        );
    }
}
