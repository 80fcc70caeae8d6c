//! Shared fixtures: a simulated supply and a relay board that records every
//! frame together with how many supply calls preceded it.

#![allow(dead_code)]

use async_trait::async_trait;
use smdt_core::{ChannelId, PortDescriptor, TestConfiguration, TestParameters};
use smdt_driver_caen::sim::{SimCall, SimulatedHvLibrary};
use smdt_driver_caen::{HvDeviceInterface, PowerSupplyController};
use smdt_driver_relay::frame::FRAME_LEN;
use smdt_driver_relay::{RelayFrame, RelayProtocolDriver, RelayTimings};
use smdt_sequencer::{RelayConnector, RunEvent, TestOrchestrator};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedFrame {
    pub frame: RelayFrame,
    /// Supply calls issued before this frame was written
    pub hv_calls_before: usize,
}

#[derive(Clone, Default)]
pub struct RelayJournal {
    frames: Arc<Mutex<Vec<RecordedFrame>>>,
}

impl RelayJournal {
    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn relay_frames(&self) -> Vec<RelayFrame> {
        self.frames().into_iter().map(|r| r.frame).collect()
    }
}

struct RecordingPort {
    journal: RelayJournal,
    sim: SimulatedHvLibrary,
    pending: Vec<u8>,
}

impl AsyncWrite for RecordingPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.pending.extend_from_slice(buf);
        while this.pending.len() >= FRAME_LEN {
            let bytes: Vec<u8> = this.pending.drain(..FRAME_LEN).collect();
            let frame = match RelayFrame::decode(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        e.to_string(),
                    )))
                }
            };
            let hv_calls_before = this.sim.calls().len();
            this.journal.frames.lock().unwrap().push(RecordedFrame {
                frame,
                hv_calls_before,
            });
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for RecordingPort {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub struct RecordingConnector {
    pub journal: RelayJournal,
    pub sim: SimulatedHvLibrary,
}

#[async_trait]
impl RelayConnector for RecordingConnector {
    async fn open(&self, _port: &PortDescriptor) -> smdt_driver_relay::Result<RelayProtocolDriver> {
        let port = RecordingPort {
            journal: self.journal.clone(),
            sim: self.sim.clone(),
            pending: Vec::new(),
        };
        Ok(RelayProtocolDriver::with_transport(
            Box::new(port),
            RelayTimings::default(),
        ))
    }
}

pub fn channels(raw: &[u8]) -> Vec<ChannelId> {
    raw.iter().map(|&c| ChannelId::new(c).unwrap()).collect()
}

/// Connected and configured station over `sim`.
pub async fn station(
    sim: &SimulatedHvLibrary,
    parameters: TestParameters,
) -> (TestOrchestrator, RelayJournal) {
    let journal = RelayJournal::default();
    let connector = RecordingConnector {
        journal: journal.clone(),
        sim: sim.clone(),
    };
    let psu = PowerSupplyController::new(HvDeviceInterface::new(Box::new(sim.clone())));
    let orch = TestOrchestrator::new(psu, Arc::new(connector));

    assert!(
        orch.connect(&PortDescriptor::new("psu"), &PortDescriptor::new("relay"))
            .await
    );
    assert!(orch.set_test_parameters(parameters));
    assert!(
        orch.initialize_test_configuration(
            TestConfiguration::default(),
            TestConfiguration::default()
        )
        .await
    );
    (orch, journal)
}

/// Receive events until the completion of `run_id`.
pub async fn collect_run(rx: &mut broadcast::Receiver<RunEvent>, run_id: u64) -> Vec<RunEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("run did not complete")
            .expect("event stream closed");
        let done = matches!(&event, RunEvent::Completed { run_id: id, .. } if *id == run_id);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Index of the first call setting `parameter` to `value`.
pub fn first_set(calls: &[SimCall], parameter: &str, value: f64) -> Option<usize> {
    calls.iter().position(|call| {
        matches!(call, SimCall::Set { parameter: p, value: v, .. } if p == parameter && *v == value)
    })
}
