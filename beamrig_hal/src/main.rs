//! # Beamrig HAL Binary
//!
//! Direct, unsupervised access to the axis controller, plus the simulated
//! controller.
//!
//! # Usage
//!
//! ```bash
//! # Who is on the other end?
//! beamrig_hal --host 192.168.1.50 identify
//!
//! # Move axis 0 to 12000 steps and wait for it
//! beamrig_hal --config rig.toml move --axis 0 --target 12000 --wait
//!
//! # Run a simulated controller on port 5000
//! beamrig_hal simulate --bind 0.0.0.0:5000 -v
//! ```

use beamrig_common::clock;
use beamrig_common::config::{ConfigError, LogLevel, RigConfig};
use beamrig_common::consts::DEFAULT_PORT;
use beamrig_hal::cooler::CoolerReadings;
use beamrig_hal::laser::LaserService;
use beamrig_hal::simulation::{self, StageConfig};
use beamrig_hal::{AxisController, Calibration};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Beamrig HAL - direct axis controller access
#[derive(Parser, Debug)]
#[command(name = "beamrig_hal")]
#[command(version)]
#[command(about = "Axis controller transport, protocol and motion tool")]
#[command(long_about = None)]
struct Args {
    /// Rig configuration file (rig.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Controller host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Controller port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Steps per millimetre when no config file is given
    #[arg(long, default_value_t = 800)]
    steps_per_unit: u32,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Query the firmware identification
    Identify,
    /// Read an axis position
    Position {
        #[arg(short, long, default_value_t = 0)]
        axis: u8,
        /// Report millimetres instead of steps
        #[arg(long)]
        mm: bool,
    },
    /// Run the homing cycle
    Home {
        #[arg(short, long, default_value_t = 0)]
        axis: u8,
    },
    /// Move an axis
    Move {
        #[arg(short, long, default_value_t = 0)]
        axis: u8,
        /// Target in steps
        #[arg(short, long, conflicts_with = "mm", required_unless_present = "mm")]
        target: Option<i64>,
        /// Target in millimetres
        #[arg(long)]
        mm: Option<f64>,
        /// Block until the axis is in position
        #[arg(short, long)]
        wait: bool,
    },
    /// Measure the travel range of an axis
    Calibrate {
        #[arg(short, long, default_value_t = 0)]
        axis: u8,
    },
    /// Laser control
    Laser {
        #[command(subcommand)]
        action: LaserCmd,
    },
    /// Read cooler telemetry
    Cooler,
    /// Serve a simulated controller until interrupted
    Simulate {
        #[arg(short, long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
        bind: String,
        /// BUSY replies before a home completes
        #[arg(long, default_value_t = 2)]
        home_busy_polls: u32,
        /// Steps travelled per position query
        #[arg(long, default_value_t = 500)]
        step: i64,
        /// Far travel limit in steps
        #[arg(long, default_value_t = 200_000)]
        limit: i64,
        /// Prefix replies with a stray 0xFF byte
        #[arg(long)]
        noise: bool,
    },
}

#[derive(Subcommand, Debug)]
enum LaserCmd {
    On,
    Off,
    Info,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("beamrig_hal failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args);
    let default_level = config
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, default_level);

    info!("Beamrig HAL v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Cmd::Simulate {
        bind,
        home_busy_polls,
        step,
        limit,
        noise,
    } = &args.command
    {
        let stage = StageConfig {
            home_busy_polls: *home_busy_polls,
            step_per_query: *step,
            travel_limit: *limit,
            noise: *noise,
        };
        return serve_simulator(bind, stage);
    }

    let config = config?;
    let controller = AxisController::connect_tcp(&config, clock::system())?;

    match args.command {
        Cmd::Identify => {
            let id = controller.identify();
            println!("{}", json!({ "identification": id }));
        }
        Cmd::Position { axis, mm } => {
            if mm {
                println!("{}", json!({ "axis": axis, "mm": controller.position_in_units(axis)? }));
            } else {
                println!("{}", json!({ "axis": axis, "steps": controller.get_position(axis)? }));
            }
        }
        Cmd::Home { axis } => {
            controller.home(axis)?;
            info!("Axis {} homed", axis);
        }
        Cmd::Move {
            axis,
            target,
            mm,
            wait,
        } => {
            let steps = match (target, mm) {
                (Some(steps), _) => steps,
                (None, Some(mm)) => controller.steps_from_units(mm),
                (None, None) => return Err("either --target or --mm is required".into()),
            };
            controller.go_to_position(axis, steps, wait)?;
            info!("Axis {} move to {} accepted", axis, steps);
        }
        Cmd::Calibrate { axis } => match controller.initialize_axis(axis) {
            Calibration::Complete {
                steps_per_unit,
                position,
                travel_range_units,
            } => println!(
                "{}",
                json!({
                    "axis": axis,
                    "steps_per_unit": steps_per_unit,
                    "position": position,
                    "travel_range_mm": travel_range_units,
                })
            ),
            Calibration::Partial {
                last_position,
                error,
            } => {
                println!("{}", json!({ "axis": axis, "last_position": last_position }));
                return Err(error.into());
            }
        },
        Cmd::Laser { action } => match action {
            LaserCmd::On => LaserService::new(&controller).turn_on()?,
            LaserCmd::Off => LaserService::with_state(&controller, true).turn_off()?,
            LaserCmd::Info => {
                let info = LaserService::new(&controller).info();
                println!("{}", serde_json::to_string(&info)?);
            }
        },
        Cmd::Cooler => {
            let readings = CoolerReadings::read(&controller)?;
            println!("{}", serde_json::to_string(&readings)?);
        }
        Cmd::Simulate { .. } => {}
    }

    beamrig_common::device::Device::disconnect(&controller);
    Ok(())
}

/// Config file (plus CLI overrides), or CLI host alone.
fn load_config(args: &Args) -> Result<RigConfig, ConfigError> {
    let mut config = match (&args.config, &args.host) {
        (Some(path), _) => RigConfig::from_file(path)?,
        (None, Some(host)) => {
            let mut config =
                RigConfig::new(host.clone(), args.port.unwrap_or(DEFAULT_PORT), args.steps_per_unit);
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config
        }
        (None, None) => {
            return Err(ConfigError::ValidationError(
                "either --config or --host is required".to_string(),
            ));
        }
    };
    if let Some(host) = &args.host {
        config.controller.host = host.clone();
    }
    if let Some(port) = args.port {
        config.controller.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn serve_simulator(bind: &str, stage: StageConfig) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let mut handle = simulation::spawn(bind, stage)?;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    handle.shutdown();
    info!("Simulator shutdown complete");
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args, default_level: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::from(default_level)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
