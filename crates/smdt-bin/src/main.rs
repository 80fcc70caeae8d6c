//! `smdt`: drive the sMDT high-voltage test station from the command line.
//!
//! # Usage
//!
//! Run the normal-polarity test on the channels routed by polarity:
//! ```bash
//! smdt run --config config/station.json
//! ```
//!
//! Reverse test on two channels against the simulated supply:
//! ```bash
//! smdt run --config config/station.json --mode reverse --channels 2,3 --simulate
//! ```
//!
//! Ctrl-C stops a run; the station always disconnects the tubes and powers
//! the channels down before exiting.

mod simulate;

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use simulate::SimulatedRelayConnector;
use smdt_core::config::StationConfig;
use smdt_core::logging::{self, TracingConfig};
use smdt_core::{ChannelId, TestMode};
use smdt_driver_caen::sim::SimulatedHvLibrary;
use smdt_driver_caen::{HvDeviceInterface, HvLibrary, PowerSupplyController};
use smdt_sequencer::{
    RelayConnector, RunEvent, RunOutcome, SerialRelayConnector, TestOrchestrator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "smdt")]
#[command(about = "sMDT high-voltage tube test station", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test and stream its readings until it completes
    Run {
        /// Station configuration file (JSON)
        #[arg(long, default_value = "config/station.json")]
        config: PathBuf,

        #[arg(long, value_enum, default_value_t = ModeArg::Normal)]
        mode: ModeArg,

        /// Channels to test, e.g. `0,1`. Defaults to the configured or
        /// polarity-routed set for the mode
        #[arg(long, value_delimiter = ',')]
        channels: Vec<u8>,

        /// Use the simulated supply and relay board
        #[arg(long)]
        simulate: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Report the polarity of every channel
    Polarity {
        #[arg(long, default_value = "config/station.json")]
        config: PathBuf,

        #[arg(long)]
        simulate: bool,
    },

    /// Validate a configuration file and print the resolved settings
    CheckConfig {
        #[arg(long, default_value = "config/station.json")]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Normal,
    Reverse,
}

impl From<ModeArg> for TestMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Normal => TestMode::Normal,
            ModeArg::Reverse => TestMode::Reverse,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            mode,
            channels,
            simulate,
            json,
        } => run_test(&config, mode.into(), &channels, simulate, json).await,
        Commands::Polarity { config, simulate } => report_polarity(&config, simulate).await,
        Commands::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &Path) -> Result<StationConfig> {
    let config = StationConfig::load_from(path)
        .with_context(|| format!("Failed to load station configuration {}", path.display()))?;
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn init_logging(config: &StationConfig) -> Result<()> {
    let tracing = TracingConfig::from_logging_config(&config.logging).map_err(anyhow::Error::msg)?;
    logging::init(tracing).map_err(anyhow::Error::msg)
}

#[cfg(feature = "caen-sdk")]
fn vendor_library() -> Result<Box<dyn HvLibrary>> {
    Ok(Box::new(smdt_driver_caen::CaenHvWrapper::new()))
}

#[cfg(not(feature = "caen-sdk"))]
fn vendor_library() -> Result<Box<dyn HvLibrary>> {
    bail!("smdt was built without the `caen-sdk` feature; use --simulate")
}

fn build_station(simulate: bool) -> Result<TestOrchestrator> {
    let (library, connector): (Box<dyn HvLibrary>, Arc<dyn RelayConnector>) = if simulate {
        info!("Using simulated supply and relay board");
        (
            Box::new(SimulatedHvLibrary::new()),
            Arc::new(SimulatedRelayConnector::new()),
        )
    } else {
        (vendor_library()?, Arc::new(SerialRelayConnector::default()))
    };
    let controller = PowerSupplyController::new(HvDeviceInterface::new(library));
    Ok(TestOrchestrator::new(controller, connector))
}

async fn connect(station: &TestOrchestrator, config: &StationConfig) -> Result<()> {
    if !station.connect(&config.port.psu, &config.port.hw).await {
        bail!("Could not connect to the power supply on {}", config.port.psu);
    }
    Ok(())
}

/// Explicit channels win, then the configuration file, then the set routed
/// by polarity.
fn resolve_channels(
    explicit: &[u8],
    configured: &[ChannelId],
    routed: Vec<ChannelId>,
) -> Result<Vec<ChannelId>> {
    if !explicit.is_empty() {
        return explicit
            .iter()
            .map(|&c| ChannelId::new(c).map_err(anyhow::Error::from))
            .collect();
    }
    if !configured.is_empty() {
        return Ok(configured.to_vec());
    }
    Ok(routed)
}

async fn run_test(
    path: &Path,
    mode: TestMode,
    explicit: &[u8],
    simulate: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(path)?;
    init_logging(&config)?;

    let station = build_station(simulate)?;
    connect(&station, &config).await?;

    if !station.set_test_parameters(config.test.parameters()) {
        bail!("Invalid test parameters");
    }
    if !station
        .initialize_test_configuration(config.test.normal, config.test.reverse)
        .await
    {
        bail!("Could not configure the power supply");
    }

    let channels = resolve_channels(
        explicit,
        config.channels.for_mode(mode),
        station.configured_channels(mode),
    )?;
    if channels.is_empty() {
        bail!("No channels with {} polarity to test", mode);
    }

    let mut events = station.subscribe();
    if !station.start(&channels, mode) {
        bail!("Run refused");
    }
    info!(?channels, %mode, "Run started, Ctrl-C to stop");

    let outcome = loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupt received, stopping run");
                station.stop();
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, json)?;
                    if let RunEvent::Completed { outcome, .. } = event {
                        break outcome;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output fell behind"),
                Err(RecvError::Closed) => bail!("Event stream closed before the run completed"),
            },
        }
    };

    station.disconnect().await;
    match outcome {
        RunOutcome::Failed(reason) => bail!("Run failed: {}", reason),
        RunOutcome::Finished | RunOutcome::Cancelled => Ok(()),
    }
}

fn print_event(event: &RunEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        RunEvent::Polarity { channel, polarity } => println!("channel {}: {} polarity", channel, polarity),
        RunEvent::TubeData(sample) => println!(
            "channel {} tube {:>2}: {:>9.3} nA {:>8.2} V{}",
            sample.channel,
            sample.tube,
            sample.current_na,
            sample.voltage,
            if sample.is_active { "" } else { " (done)" }
        ),
        RunEvent::ChannelStatus(report) => {
            println!("channel {} status: {}", report.channel, report.tokens.join(" "))
        }
        RunEvent::TimeInfo { elapsed, remaining } => {
            println!("elapsed {}, remaining {}", elapsed, remaining)
        }
        RunEvent::Completed { run_id, outcome } => println!("run {} {}", run_id, outcome),
    }
    Ok(())
}

async fn report_polarity(path: &Path, simulate: bool) -> Result<()> {
    let config = load_config(path)?;
    init_logging(&config)?;

    let station = build_station(simulate)?;
    connect(&station, &config).await?;
    for channel in ChannelId::all() {
        match station.channel_polarity(channel) {
            Some(polarity) => println!("channel {}: {}", channel, polarity),
            None => println!("channel {}: unknown", channel),
        }
    }
    station.disconnect().await;
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
