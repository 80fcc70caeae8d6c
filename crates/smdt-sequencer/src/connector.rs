//! How a run obtains its relay board.

use async_trait::async_trait;
use smdt_core::port::PortDescriptor;
use smdt_driver_relay::{RelayProtocolDriver, RelayTimings, Result};

/// Opens the relay board at the start of every run.
///
/// The worker owns the returned driver for the duration of the run and drops
/// it (closing the port) when the run ends.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self, port: &PortDescriptor) -> Result<RelayProtocolDriver>;
}

/// Relay board on a serial port.
#[derive(Debug, Clone, Default)]
pub struct SerialRelayConnector {
    timings: RelayTimings,
}

impl SerialRelayConnector {
    pub fn new(timings: RelayTimings) -> Self {
        Self { timings }
    }
}

#[async_trait]
impl RelayConnector for SerialRelayConnector {
    async fn open(&self, port: &PortDescriptor) -> Result<RelayProtocolDriver> {
        RelayProtocolDriver::open(port, self.timings).await
    }
}
