//! # Axon Control
//!
//! Single-axis CiA 402 servo motion controller over a cyclic fieldbus
//! exchange.
//!
//! Startup sequence: load/merge configuration, open the bus backend,
//! configure the drive's operation mode via SDO, bring the bus to
//! SafeOperational, then split into the real-time cyclic thread and the
//! supervisory loop. On any exit path the bus is returned to Init before
//! the process terminates.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use axon_common::bus::{BusLayer, BusState};
use axon_common::cia402::OperationMode;
use axon_common::shared::{MotionCommand, SharedContext};

use axon_control::bus::sim::{SimBus, SimConfig};
use axon_control::config::{ConfigError, ControllerConfig};
use axon_control::cycle::{CycleRunner, rt_setup};
use axon_control::error::ControlError;
use axon_control::supervisor::Supervisor;

/// Axon - single-axis CiA 402 servo motion controller
#[derive(Parser, Debug)]
#[command(name = "axon_control")]
#[command(version)]
#[command(about = "Single-axis CiA 402 servo motion controller")]
struct Args {
    /// Bus backend: "sim" selects the built-in drive simulation. A hardware
    /// EtherCAT master plugs in behind the BusLayer trait.
    interface: String,

    /// Target angle [deg] in position mode, target speed [deg/s] in
    /// velocity mode.
    target: f64,

    /// Speed limit [deg/s] (position mode).
    #[arg(default_value_t = 180.0)]
    speed: f64,

    /// Acceleration [deg/s²]; defaults to the configured value.
    #[arg(long)]
    accel: Option<f64>,

    /// Operation mode.
    #[arg(long, value_enum, default_value = "position")]
    mode: ModeArg,

    /// Path to the controller configuration TOML.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CPU core to pin the RT thread to (overrides config).
    #[arg(long)]
    cpu_core: Option<usize>,

    /// SCHED_FIFO priority (overrides config).
    #[arg(long)]
    rt_priority: Option<i32>,

    /// Probe and log the vendor driver-status object before starting.
    #[arg(long)]
    driver_status: bool,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ModeArg {
    /// Cyclic synchronous position (trapezoidal profile).
    Position,
    /// Cyclic synchronous velocity (direct setpoint).
    Velocity,
}

impl From<ModeArg> for OperationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Position => OperationMode::CyclicSynchronousPosition,
            ModeArg::Velocity => OperationMode::CyclicSynchronousVelocity,
        }
    }
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("axon controller v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("shutdown complete");
}

fn run(args: &Args) -> Result<(), ControlError> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(core) = args.cpu_core {
        config.rt.cpu_core = core;
    }
    if let Some(priority) = args.rt_priority {
        config.rt.priority = priority;
    }
    config.validate()?;

    let mode = OperationMode::from(args.mode);
    let command = build_command(args, mode, &config)?;
    info!(
        mode = ?mode,
        cycle_us = config.cycle.cycle_time_us,
        "configuration OK"
    );

    let bus = open_bus(&args.interface)?;
    let shared = Arc::new(SharedContext::new());

    // Operator signal: cooperative shutdown, observed at cycle boundaries.
    {
        let shared = shared.clone();
        ctrlc::set_handler(move || {
            shared.request_shutdown();
        })
        .map_err(|e| ControlError::Startup(format!("signal handler: {e}")))?;
    }

    let supervisor = Supervisor::new(bus.clone(), shared.clone(), &config);

    if args.driver_status {
        match supervisor.probe_driver_status() {
            Ok(status) => info!("driver status 0x{status:04X}"),
            Err(err) => warn!("driver-status probe failed: {err}"),
        }
    }

    supervisor.configure_drive(mode)?;

    // Real-time cyclic thread.
    let mut runner = CycleRunner::new(bus.clone(), shared.clone(), &config, mode);
    let (cpu_core, priority) = (config.rt.cpu_core, config.rt.priority);
    let cyclic = thread::Builder::new()
        .name("axon-cycle".into())
        .spawn(move || -> Result<(), ControlError> {
            rt_setup(cpu_core, priority)?;
            runner.run()
        })
        .map_err(|e| ControlError::Startup(format!("cyclic thread spawn: {e}")))?;

    let result = supervisor.run(command);

    shared.request_shutdown();
    let cyclic_result = match cyclic.join() {
        Ok(r) => r,
        Err(_) => Err(ControlError::Startup("cyclic thread panicked".into())),
    };

    // Best-effort return to a quiescent bus state on every exit path.
    match bus.request_state(BusState::Init) {
        Ok(()) => info!("bus returned to Init"),
        Err(err) => warn!("failed to return bus to Init: {err}"),
    }

    result.and(cyclic_result)
}

fn open_bus(interface: &str) -> Result<Arc<dyn BusLayer>, ControlError> {
    match interface {
        "sim" => Ok(Arc::new(SimBus::new(SimConfig::default()))),
        other => Err(ConfigError::Invalid(format!(
            "unknown bus backend '{other}' (use \"sim\"; hardware masters attach via BusLayer)"
        ))
        .into()),
    }
}

/// Build the motion command from the CLI surface, in drive counts.
///
/// Limits are validated here so a bad command fails the process before the
/// bus is ever touched.
fn build_command(
    args: &Args,
    mode: OperationMode,
    config: &ControllerConfig,
) -> Result<MotionCommand, ControlError> {
    let scale = config.unit_scale();
    let command = match mode {
        OperationMode::CyclicSynchronousPosition => MotionCommand::Move {
            target: scale.degrees_to_counts(args.target).round() as i64,
            max_velocity: scale.degrees_to_counts(args.speed),
            acceleration: scale
                .degrees_to_counts(args.accel.unwrap_or(config.motion.default_acceleration)),
        },
        OperationMode::CyclicSynchronousVelocity => MotionCommand::Velocity {
            target: scale.degrees_to_counts(args.target),
        },
    };
    command.validate()?;
    Ok(command)
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
