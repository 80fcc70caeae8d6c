//! Normal-mode run against the simulated supply.

mod common;

use common::{channels, collect_run, station};
use smdt_core::{Polarity, TestMode, TestParameters};
use smdt_driver_caen::sim::{SimCall, SimulatedHvLibrary};
use smdt_driver_relay::RelayFrame;
use smdt_sequencer::{OrchestratorState, RunEvent, RunOutcome};
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test(start_paused = true)]
async fn two_tubes_on_two_channels() {
    // Different zero-volt leakage per channel, same load
    let sim = SimulatedHvLibrary::new()
        .with_leakage(0, 0.010)
        .with_leakage(1, 0.002);
    let (orch, journal) = station(&sim, TestParameters::new(1, 2, 0)).await;
    let mut rx = orch.subscribe();
    sim.clear_calls();

    assert!(orch.start(&channels(&[0, 1]), TestMode::Normal));
    assert_eq!(orch.state(), OrchestratorState::Running);

    let events = collect_run(&mut rx, 1).await;

    assert_eq!(
        events.last(),
        Some(&RunEvent::Completed {
            run_id: 1,
            outcome: RunOutcome::Finished,
        })
    );
    assert_eq!(orch.state(), OrchestratorState::Connected);

    // Polarity first, one per channel
    assert_eq!(
        events[..2],
        [
            RunEvent::Polarity {
                channel: channels(&[0])[0],
                polarity: Polarity::Normal,
            },
            RunEvent::Polarity {
                channel: channels(&[1])[0],
                polarity: Polarity::Normal,
            },
        ]
    );

    let samples: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::TubeData(sample) => Some(sample.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(samples.len(), 8);
    assert_eq!(samples.iter().filter(|s| s.is_active).count(), 4);
    assert_eq!(samples.iter().filter(|s| !s.is_active).count(), 4);

    // Offsets removed per channel: 15 V across 0.0001 µA/V leaves 1.5 nA
    for sample in samples.iter().filter(|s| s.is_active) {
        assert!((sample.current_na - 1.5).abs() < 1e-3, "{:?}", sample);
        assert!((sample.voltage - 15.0).abs() < 1e-6);
    }
    let tubes: Vec<(u8, u32, bool)> = samples
        .iter()
        .map(|s| (s.channel.get(), s.tube, s.is_active))
        .collect();
    assert_eq!(
        tubes,
        vec![
            (0, 0, true),
            (1, 0, true),
            (0, 0, false),
            (1, 0, false),
            (0, 1, true),
            (1, 1, true),
            (0, 1, false),
            (1, 1, false),
        ]
    );

    let statuses = events
        .iter()
        .filter(|e| matches!(e, RunEvent::ChannelStatus(_)))
        .count();
    assert_eq!(statuses, 4);

    // Elapsed counts from the start of the run, remaining covers the scan
    let times: Vec<(u64, String)> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::TimeInfo { elapsed, remaining } => Some((seconds(elapsed), remaining.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        times.iter().map(|(_, r)| r.as_str()).collect::<Vec<_>>(),
        vec!["1 s", "0 s"]
    );
    assert!(times[0].0 >= 1, "calibration and reset precede the scan");
    assert!(times[1].0 > times[0].0);

    // Offset read is one batched call covering both channels
    let current_reads: Vec<_> = sim
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            SimCall::Get { parameter, channels } if parameter == "IMonH" => Some(channels),
            _ => None,
        })
        .collect();
    assert_eq!(current_reads.len(), 3);
    assert!(current_reads.iter().all(|c| c == &vec![0, 1]));

    let frames = journal.relay_frames();
    let expected: Vec<RelayFrame> = [
        // reset
        RelayFrame::disconnect(0),
        RelayFrame::disconnect(1),
        RelayFrame::disconnect(2),
        RelayFrame::disconnect(3),
        // tube 0 of each channel
        RelayFrame::connect(0),
        RelayFrame::connect(2),
        RelayFrame::disconnect(0),
        RelayFrame::disconnect(2),
        // tube 1 of each channel
        RelayFrame::connect(1),
        RelayFrame::connect(3),
        RelayFrame::disconnect(1),
        RelayFrame::disconnect(3),
        // shutdown
        RelayFrame::disconnect(0),
        RelayFrame::disconnect(1),
        RelayFrame::disconnect(2),
        RelayFrame::disconnect(3),
    ]
    .to_vec();
    assert_eq!(frames, expected);

    assert!(!sim.channel(0).unwrap().power);
    assert!(!sim.channel(1).unwrap().power);
    // Programmed voltage restored after calibration
    assert_eq!(sim.channel(0).unwrap().vset, 15.0);

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn calibration_only_touches_active_channels() {
    let sim = SimulatedHvLibrary::new();
    let (orch, _journal) = station(&sim, TestParameters::new(1, 1, 1)).await;
    let mut rx = orch.subscribe();
    sim.clear_calls();

    assert!(orch.start(&channels(&[2]), TestMode::Normal));
    collect_run(&mut rx, 1).await;

    let vset_writes: Vec<_> = sim
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            SimCall::Set {
                parameter,
                channels,
                value,
            } if parameter == "VSet" => Some((channels, value)),
            _ => None,
        })
        .collect();
    assert_eq!(vset_writes, vec![(vec![2], 0.0), (vec![2], 15.0)]);
    assert!(!sim.channel(0).unwrap().power);
}

#[tokio::test(start_paused = true)]
async fn tripped_channel_reports_status_tokens() {
    let sim = SimulatedHvLibrary::new();
    let (orch, _journal) = station(&sim, TestParameters::new(1, 1, 0)).await;
    let mut rx = orch.subscribe();
    // Over-current on channel 0
    sim.set_extra_status(0, 1 << 3);

    assert!(orch.start(&channels(&[0]), TestMode::Normal));
    let events = collect_run(&mut rx, 1).await;

    let report = events
        .iter()
        .find_map(|e| match e {
            RunEvent::ChannelStatus(report) => Some(report.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(report.tokens, vec!["ON".to_string(), "OVC".to_string()]);
}

fn seconds(text: &str) -> u64 {
    text.trim_end_matches(" s").parse().unwrap()
}
