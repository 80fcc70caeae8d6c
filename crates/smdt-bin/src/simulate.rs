//! Stand-in relay board for `--simulate` runs.

use async_trait::async_trait;
use smdt_core::PortDescriptor;
use smdt_driver_relay::frame::FRAME_LEN;
use smdt_driver_relay::{RelayFrame, RelayProtocolDriver, RelayTimings};
use smdt_sequencer::RelayConnector;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Relay board on an in-memory pipe whose far end decodes and logs frames.
pub struct SimulatedRelayConnector {
    timings: RelayTimings,
}

impl SimulatedRelayConnector {
    pub fn new() -> Self {
        // No reset delay on a board that does not exist
        Self {
            timings: RelayTimings {
                startup: Duration::ZERO,
                ..RelayTimings::default()
            },
        }
    }
}

impl Default for SimulatedRelayConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayConnector for SimulatedRelayConnector {
    async fn open(&self, port: &PortDescriptor) -> smdt_driver_relay::Result<RelayProtocolDriver> {
        let (near, mut far) = tokio::io::duplex(256);
        let port = port.port.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; FRAME_LEN];
            while far.read_exact(&mut buf).await.is_ok() {
                match RelayFrame::decode(&buf) {
                    Ok(frame) => debug!(%port, tube = frame.tube, enable = frame.enable, "Simulated relay"),
                    Err(e) => warn!(%port, error = %e, "Simulated relay rejected frame"),
                }
            }
        });

        Ok(RelayProtocolDriver::with_transport(Box::new(near), self.timings))
    }
}
