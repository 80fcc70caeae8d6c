//! Test sequencing for the sMDT high-voltage test station.
//!
//! [`TestOrchestrator`] owns the station session (supply connection, relay
//! port, timing, per-polarity configuration) and starts runs. Each run is a
//! [`TestWorker`] on its own task with exclusive use of the hardware; its
//! [`RunEvent`]s fan out to every subscriber.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use smdt_core::{ChannelId, PortDescriptor, TestConfiguration, TestMode};
//! use smdt_driver_caen::{sim::SimulatedHvLibrary, HvDeviceInterface, PowerSupplyController};
//! use smdt_sequencer::{RunEvent, SerialRelayConnector, TestOrchestrator};
//!
//! # async fn demo() {
//! let psu = PowerSupplyController::new(HvDeviceInterface::new(Box::new(SimulatedHvLibrary::new())));
//! let station = TestOrchestrator::new(psu, Arc::new(SerialRelayConnector::default()));
//!
//! station.connect(&PortDescriptor::new("ttyACM0"), &PortDescriptor::new("/dev/ttyUSB0")).await;
//! station
//!     .initialize_test_configuration(TestConfiguration::default(), TestConfiguration::default())
//!     .await;
//!
//! let mut events = station.subscribe();
//! station.start(&[ChannelId::new(0).unwrap()], TestMode::Normal);
//! while let Ok(event) = events.recv().await {
//!     if let RunEvent::Completed { outcome, .. } = event {
//!         println!("run {}", outcome);
//!         break;
//!     }
//! }
//! # }
//! ```

pub mod connector;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod worker;

pub use connector::{RelayConnector, SerialRelayConnector};
pub use error::SequencerError;
pub use events::{RunEvent, RunId, RunOutcome};
pub use orchestrator::{OrchestratorState, TestOrchestrator};
pub use worker::{RunContext, SharedController, TestWorker};
