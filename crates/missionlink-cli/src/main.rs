//! MissionLink CLI
//!
//! Runs mission upload and download scenarios against a simulated vehicle.

mod config;
mod progress;

use clap::{Args, Parser, Subcommand};
use console::style;
use missionlink_core::sim::spawn_vehicle;
use missionlink_core::{
    ChannelObserver, EngineHandle, FailureMode, ItemPayload, MissionItemSet, SimVehicle,
    TransferEvent, TransferKind,
};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use config::Config;
use progress::{ItemProgress, format_duration};

/// Inbound queue depth between the simulated vehicle and the engine
const INBOUND_QUEUE_DEPTH: usize = 64;

/// MissionLink - reliable mission item transfer
#[derive(Parser)]
#[command(name = "missionlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a generated mission to the simulated vehicle
    Upload(Scenario),

    /// Download the simulated vehicle's mission
    Download(Scenario),

    /// Upload a mission, read it back and compare
    Roundtrip(Scenario),

    /// Show effective configuration and failure modes
    Status,
}

#[derive(Args, Clone)]
struct Scenario {
    /// Number of mission items
    #[arg(short = 'n', long, default_value_t = 8)]
    items: u16,

    /// Failure the vehicle injects
    #[arg(short, long, default_value = "none")]
    failure: FailureMode,

    /// Inject the failure only once
    #[arg(long)]
    fail_once: bool,

    /// Message loss probability (overrides the config file)
    #[arg(long)]
    loss: Option<f64>,

    /// Print the resulting mission as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        })
        .init();

    match cli.command {
        Commands::Upload(scenario) => {
            let config = apply_overrides(config, &scenario)?;
            upload(&scenario, &config).await?;
        }
        Commands::Download(scenario) => {
            let config = apply_overrides(config, &scenario)?;
            download(&scenario, &config).await?;
        }
        Commands::Roundtrip(scenario) => {
            let config = apply_overrides(config, &scenario)?;
            roundtrip(&scenario, &config).await?;
        }
        Commands::Status => {
            config.validate()?;
            show_status(&config);
        }
    }

    Ok(())
}

fn apply_overrides(mut config: Config, scenario: &Scenario) -> anyhow::Result<Config> {
    if let Some(loss) = scenario.loss {
        config.link.loss = loss;
    }
    config.validate()?;
    Ok(config)
}

/// Engine connected to a simulated vehicle task
struct Session {
    handle: EngineHandle,
    events: mpsc::UnboundedReceiver<TransferEvent>,
    vehicle: JoinHandle<SimVehicle>,
}

impl Session {
    fn connect(vehicle: SimVehicle, config: &Config) -> anyhow::Result<Self> {
        let (to_vehicle, from_engine) = mpsc::unbounded_channel();
        let (to_engine, inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let (observer, events) = ChannelObserver::new();

        let handle = EngineHandle::spawn(config.transfer_config(), to_vehicle, inbound, observer)?;
        let vehicle = spawn_vehicle(vehicle, config.link_model(), from_engine, to_engine);

        Ok(Self {
            handle,
            events,
            vehicle,
        })
    }

    /// Start a transfer and follow it to its end
    async fn transfer(
        &mut self,
        kind: TransferKind,
        mission: Option<MissionItemSet>,
    ) -> anyhow::Result<TransferEvent> {
        let total = mission.as_ref().map(MissionItemSet::count);
        match mission {
            Some(items) => self.handle.begin_write(items).await?,
            None => self.handle.begin_read().await?,
        }

        let progress = ItemProgress::new(kind, total);
        while let Some(event) = self.events.recv().await {
            if progress.observe(&event) {
                return Ok(event);
            }
        }
        anyhow::bail!("Engine stopped before the {} finished", kind)
    }

    async fn close(self) -> anyhow::Result<SimVehicle> {
        self.handle.shutdown().await?;
        Ok(self.vehicle.await?)
    }
}

fn vehicle_for(scenario: &Scenario, mission: MissionItemSet) -> SimVehicle {
    let mut vehicle = SimVehicle::with_mission(mission);
    vehicle.set_failure_mode(scenario.failure, scenario.fail_once);
    vehicle
}

/// Square survey pattern around a fixed home position
fn sample_mission(count: u16) -> anyhow::Result<MissionItemSet> {
    const HOME: (f64, f64) = (47.397_742, 8.545_594);
    const STEP: f64 = 0.000_5;

    let payloads = (0..count).map(|i| {
        let leg = f64::from(i / 4);
        let (dx, dy) = match i % 4 {
            0 => (0.0, 0.0),
            1 => (1.0, 0.0),
            2 => (1.0, 1.0),
            _ => (0.0, 1.0),
        };
        ItemPayload {
            command: if i == 0 { 22 } else { 16 },
            frame: 3,
            params: [
                0.0,
                0.0,
                0.0,
                0.0,
                HOME.0 + (dx + leg) * STEP,
                HOME.1 + dy * STEP,
                50.0,
            ],
            current: i == 0,
            autocontinue: true,
        }
    });
    Ok(MissionItemSet::from_payloads(payloads)?)
}

fn print_header(title: &str, scenario: &Scenario, config: &Config) {
    println!("{}", style(title).bold());
    println!("Items: {}", scenario.items);
    println!(
        "Failure: {}{}",
        scenario.failure,
        if scenario.fail_once { " (once)" } else { "" }
    );
    println!(
        "Link: {:.0}% loss, {} ms latency",
        config.link.loss * 100.0,
        config.link.latency_ms
    );
    println!();
}

fn finish(event: &TransferEvent, started: Instant) -> anyhow::Result<()> {
    println!("Elapsed: {}", format_duration(started.elapsed()));
    match event {
        TransferEvent::Failed {
            code,
            detail,
            transient,
            ..
        } => {
            if *transient {
                let hint = "The vehicle may answer if the transfer is retried";
                println!("{}", style(hint).yellow());
            }
            anyhow::bail!("{}: {}", code, detail)
        }
        _ => Ok(()),
    }
}

fn print_json(mission: &MissionItemSet) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(mission)?);
    Ok(())
}

/// Upload a generated mission
async fn upload(scenario: &Scenario, config: &Config) -> anyhow::Result<()> {
    tracing::info!(
        "Upload of {} items (failure: {})",
        scenario.items,
        scenario.failure
    );
    print_header("Mission upload", scenario, config);

    let mission = sample_mission(scenario.items)?;
    let mut session = Session::connect(vehicle_for(scenario, MissionItemSet::new()), config)?;

    let started = Instant::now();
    let event = session.transfer(TransferKind::Write, Some(mission)).await?;
    let vehicle = session.close().await?;

    println!("Vehicle now stores {} items", vehicle.mission().count());
    if scenario.json {
        print_json(vehicle.mission())?;
    }
    finish(&event, started)
}

/// Download the vehicle's mission
async fn download(scenario: &Scenario, config: &Config) -> anyhow::Result<()> {
    tracing::info!(
        "Download of {} items (failure: {})",
        scenario.items,
        scenario.failure
    );
    print_header("Mission download", scenario, config);

    let vehicle = vehicle_for(scenario, sample_mission(scenario.items)?);
    let mut session = Session::connect(vehicle, config)?;

    let started = Instant::now();
    let event = session.transfer(TransferKind::Read, None).await?;
    let snapshot = session.handle.snapshot().await?;
    session.close().await?;

    if scenario.json {
        print_json(&snapshot.mission)?;
    }
    finish(&event, started)
}

/// Upload then download and compare
async fn roundtrip(scenario: &Scenario, config: &Config) -> anyhow::Result<()> {
    print_header("Mission round trip", scenario, config);

    let mission = sample_mission(scenario.items)?;
    let mut vehicle = SimVehicle::new();
    if scenario.failure.is_write() {
        vehicle.set_failure_mode(scenario.failure, scenario.fail_once);
    }
    let mut session = Session::connect(vehicle, config)?;

    let started = Instant::now();
    let event = session
        .transfer(TransferKind::Write, Some(mission.clone()))
        .await?;
    finish(&event, started)?;

    if !scenario.failure.is_write() && scenario.failure != FailureMode::None {
        // The vehicle task owns its state; reconnect with the read failure armed.
        let mut vehicle = session.close().await?;
        vehicle.set_failure_mode(scenario.failure, scenario.fail_once);
        session = Session::connect(vehicle, config)?;
    }

    let event = session.transfer(TransferKind::Read, None).await?;
    let snapshot = session.handle.snapshot().await?;
    session.close().await?;
    finish(&event, started)?;

    if snapshot.mission != mission {
        anyhow::bail!("Mission read back differs from the mission written");
    }
    println!(
        "{} {} items match",
        style("Verified").green().bold(),
        mission.count()
    );
    if scenario.json {
        print_json(&snapshot.mission)?;
    }
    Ok(())
}

/// Show effective configuration
fn show_status(config: &Config) {
    println!("MissionLink Status");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Config file: {}", Config::default_path().display());
    println!();

    println!("Transfer:");
    println!("  Ack timeout: {} ms", config.transfer.ack_timeout_ms);
    println!("  Max retries: {}", config.transfer.max_retries);
    println!();

    println!("Link:");
    println!("  Loss: {}", config.link.loss);
    println!("  Latency: {} ms", config.link.latency_ms);
    println!("  Seed: {}", config.link.seed);
    println!();

    println!("Failure modes:");
    for mode in FailureMode::ALL {
        println!("  {mode}");
    }
}
