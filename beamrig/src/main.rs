//! # Beamrig Supervisor Binary
//!
//! Runs the supervised device layer: keeps the axis controller connected,
//! reconnects it when it stops answering, and logs its status until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! beamrig --config rig.toml
//!
//! # Against a local simulated controller
//! beamrig --simulate -v --status-interval 2
//! ```

use beamrig::{AppContext, AxisService, HostLease};
use beamrig_common::clock;
use beamrig_common::config::{ConfigError, LogLevel, RigConfig};
use beamrig_common::watchdog::DeviceKind;
use beamrig_hal::simulation::{self, SimulatorHandle, StageConfig};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Beamrig - supervised axis controller
#[derive(Parser, Debug)]
#[command(name = "beamrig")]
#[command(version)]
#[command(about = "Supervised connection to the beam profiling rig")]
#[command(long_about = None)]
struct Args {
    /// Rig configuration file (rig.toml)
    #[arg(short, long, value_name = "FILE", required_unless_present = "simulate")]
    config: Option<PathBuf>,

    /// Start a local simulated controller and connect to it
    #[arg(long)]
    simulate: bool,

    /// Seconds to wait for the first connection
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Seconds between status lines
    #[arg(long, default_value_t = 5)]
    status_interval: u64,

    /// Axis reported in status lines
    #[arg(long, default_value_t = 0)]
    axis: u8,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("beamrig failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (config, _simulator) = load_config(&args)?;
    setup_tracing(&args, config.shared.log_level);

    info!("Beamrig v{} starting...", env!("CARGO_PKG_VERSION"));

    let lease = HostLease::new();
    let context = Arc::new(AppContext::new(config, clock::system(), lease.watch()));
    {
        let keep_alive = context.keep_alive();
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            keep_alive.store(false, Ordering::SeqCst);
        })?;
    }

    let service = AxisService::new(Arc::clone(&context));
    match service.connect(Duration::from_secs(args.connect_timeout)) {
        Ok(_) => info!("Axis controller ready"),
        Err(e) => warn!("Axis controller not ready yet: {}", e),
    }

    let status_interval = Duration::from_secs(args.status_interval.max(1));
    let mut last_status: Option<Instant> = None;
    while context.is_running() {
        if last_status.is_none_or(|at| at.elapsed() >= status_interval) {
            last_status = Some(Instant::now());
            log_status(&context, &service, args.axis);
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    context.shutdown();
    drop(lease);
    info!("Beamrig shutdown complete");
    Ok(())
}

/// Config file (with environment overrides), or a simulator on localhost.
fn load_config(args: &Args) -> Result<(RigConfig, Option<SimulatorHandle>), ConfigError> {
    if args.simulate {
        let simulator = simulation::spawn_local(StageConfig::default())
            .map_err(|e| ConfigError::ValidationError(format!("simulator: {e}")))?;
        let mut config = match &args.config {
            Some(path) => RigConfig::from_file(path)?,
            None => RigConfig::new("127.0.0.1", simulator.port(), 800),
        };
        config.controller.host = "127.0.0.1".to_string();
        config.controller.port = simulator.port();
        config.transport.settle_delay_ms = 0;
        config.validate()?;
        return Ok((config, Some(simulator)));
    }

    let path = args
        .config
        .as_ref()
        .ok_or_else(|| ConfigError::ValidationError("--config is required".to_string()))?;
    Ok((RigConfig::from_file(path)?, None))
}

fn log_status(context: &AppContext, service: &AxisService, axis: u8) {
    let health = context.health(DeviceKind::AxisController);
    let position = match service.position(axis) {
        Ok(steps) => json!(steps),
        Err(_) => json!(null),
    };
    info!(
        "{}",
        json!({
            "device": DeviceKind::AxisController.as_str(),
            "healthy": health.is_healthy(),
            "alive": service.is_alive(),
            "axis": axis,
            "position": position,
        })
    );
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
