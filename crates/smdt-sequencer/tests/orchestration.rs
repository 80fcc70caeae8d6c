//! Stop and restart behaviour across runs.

mod common;

use common::{channels, collect_run, station};
use smdt_core::{TestMode, TestParameters};
use smdt_driver_caen::sim::SimulatedHvLibrary;
use smdt_sequencer::{OrchestratorState, RunEvent, RunOutcome};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test(start_paused = true)]
async fn stop_twice_completes_once() {
    let sim = SimulatedHvLibrary::new();
    let (orch, _journal) = station(&sim, TestParameters::new(30, 4, 1)).await;
    let mut rx = orch.subscribe();

    assert!(orch.start(&channels(&[0, 1]), TestMode::Normal));
    tokio::time::sleep(Duration::from_secs(10)).await;
    orch.stop();
    orch.stop();

    let events = collect_run(&mut rx, 1).await;
    assert_eq!(
        events.last(),
        Some(&RunEvent::Completed {
            run_id: 1,
            outcome: RunOutcome::Cancelled,
        })
    );
    // Connected tubes were released and reported inactive
    let last_samples: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::TubeData(s) => Some(s),
            _ => None,
        })
        .rev()
        .take(2)
        .collect();
    assert!(last_samples.iter().all(|s| !s.is_active));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(orch.state(), OrchestratorState::Connected);
    assert!(!sim.channel(0).unwrap().power);

    // No run left to stop
    orch.stop();
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn start_while_running_supersedes_previous_run() {
    let sim = SimulatedHvLibrary::new();
    let (orch, journal) = station(&sim, TestParameters::new(5, 2, 0)).await;
    let mut rx = orch.subscribe();

    assert!(orch.start(&channels(&[0, 1]), TestMode::Normal));
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(orch.start(&channels(&[3]), TestMode::Normal));
    assert_eq!(orch.state(), OrchestratorState::Running);

    let events = collect_run(&mut rx, 2).await;

    let completions: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Completed { run_id, outcome } => Some((*run_id, outcome.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        completions,
        vec![(1, RunOutcome::Cancelled), (2, RunOutcome::Finished)]
    );

    // Nothing from the first run arrives after its completion
    let first_done = events
        .iter()
        .position(|e| matches!(e, RunEvent::Completed { run_id: 1, .. }))
        .unwrap();
    assert!(events[first_done + 1..].iter().all(|e| match e {
        RunEvent::TubeData(sample) => sample.channel.get() == 3,
        RunEvent::ChannelStatus(report) => report.channel.get() == 3,
        _ => true,
    }));

    // The second run started only after the first released the relay board
    let frames = journal.relay_frames();
    let second_reset = frames
        .windows(2)
        .position(|w| w[0].tube == 6 && !w[0].enable && w[1].tube == 7 && !w[1].enable)
        .unwrap();
    assert!(frames[..second_reset].iter().all(|f| f.tube < 4));

    assert_eq!(orch.state(), OrchestratorState::Connected);
}

#[tokio::test(start_paused = true)]
async fn connection_is_kept_while_running() {
    let sim = SimulatedHvLibrary::new();
    let (orch, _journal) = station(&sim, TestParameters::new(5, 1, 0)).await;
    let mut rx = orch.subscribe();

    assert!(orch.start(&channels(&[0]), TestMode::Normal));
    // Let the run take the hardware
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!orch.disconnect().await);
    assert_eq!(orch.channel_polarity(channels(&[0])[0]), None);

    collect_run(&mut rx, 1).await;
    assert!(orch.channel_polarity(channels(&[0])[0]).is_some());
    assert!(orch.disconnect().await);
}
