//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load the rig's TOML
//! configuration and to apply the controller environment overrides.
//!
//! # Usage
//!
//! ```rust,no_run
//! use beamrig_common::config::{ConfigError, RigConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = RigConfig::from_file(Path::new("rig.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `controller.host`.
pub const ENV_CONTROLLER_HOST: &str = "AXIS_CONTROLLER_IP";
/// Environment variable overriding `controller.port`.
pub const ENV_CONTROLLER_PORT: &str = "AXIS_CONTROLLER_PORT";
/// Environment variable overriding `controller.steps_per_unit`.
pub const ENV_STEPS_PER_UNIT: &str = "AXIS_STEPS_PER_MM";

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Raw bytes on the wire.
    Trace,
    /// Every exchange with the controller.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// Advisory protocol faults.
    Warn,
    /// Teardowns and failed operations.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Common configuration fields shared across beamrig binaries.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "beamrig-lab-2"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Rig configuration ──────────────────────────────────────────────

fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Endpoint and unit conversion of the axis controller (`[controller]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller host name or IP address.
    pub host: String,
    /// Controller TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Motor steps per millimetre of stage travel.
    pub steps_per_unit: u32,
}

impl ControllerConfig {
    /// `host:port` string suitable for `ToSocketAddrs`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

macro_rules! ms_default {
    ($($name:ident => $value:expr),* $(,)?) => {
        $(fn $name() -> u64 { $value })*
    };
}

ms_default! {
    d_connect_timeout => DEFAULT_CONNECT_TIMEOUT_MS,
    d_response_timeout => DEFAULT_RESPONSE_TIMEOUT_MS,
    d_idle_timeout => DEFAULT_IDLE_TIMEOUT_MS,
    d_drain_timeout => DEFAULT_DRAIN_TIMEOUT_MS,
    d_settle_delay => DEFAULT_SETTLE_DELAY_MS,
    d_pacing => DEFAULT_PACING_MS,
    d_handshake_interval => DEFAULT_HANDSHAKE_INTERVAL_MS,
    d_handshake_timeout => DEFAULT_HANDSHAKE_TIMEOUT_MS,
    d_busy_poll => DEFAULT_BUSY_POLL_MS,
    d_position_timeout => DEFAULT_POSITION_TIMEOUT_MS,
    d_home_poll => DEFAULT_HOME_POLL_MS,
    d_home_timeout => DEFAULT_HOME_TIMEOUT_MS,
    d_position_poll => DEFAULT_POSITION_POLL_MS,
    d_move_timeout => DEFAULT_MOVE_TIMEOUT_MS,
    d_home_settle => DEFAULT_HOME_SETTLE_MS,
    d_liveness_window => DEFAULT_LIVENESS_WINDOW_MS,
    d_ping_interval => DEFAULT_PING_INTERVAL_MS,
    d_ping_quiet => DEFAULT_PING_QUIET_MS,
    d_calibration_poll => DEFAULT_CALIBRATION_POLL_MS,
    d_calibration_margin => DEFAULT_CALIBRATION_SETTLE_MARGIN_MS,
    d_reconnect_interval => DEFAULT_RECONNECT_INTERVAL_MS,
    d_health_check_interval => DEFAULT_HEALTH_CHECK_INTERVAL_MS,
    d_supervisor_tick => DEFAULT_SUPERVISOR_TICK_MS,
    d_host_check_interval => DEFAULT_HOST_CHECK_INTERVAL_MS,
    d_watchdog_tick => DEFAULT_WATCHDOG_TICK_MS,
}

fn d_retries() -> u32 {
    DEFAULT_RETRIES
}

fn d_stall_repeats() -> u32 {
    DEFAULT_STALL_REPEATS
}

fn d_calibration_target() -> i64 {
    DEFAULT_CALIBRATION_TARGET
}

/// Socket timing policy (`[transport]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Steady-state wait for the first byte of a reply.
    #[serde(default = "d_response_timeout")]
    pub response_timeout_ms: u64,
    /// Silence after the last byte that ends a reply.
    #[serde(default = "d_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Wait used while discarding stale input before a send.
    #[serde(default = "d_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// Delay after accept before the firmware answers.
    #[serde(default = "d_settle_delay")]
    pub settle_delay_ms: u64,
    /// Pause before each outbound command.
    #[serde(default = "d_pacing")]
    pub pacing_ms: u64,
    /// Attempts per query or ping.
    #[serde(default = "d_retries")]
    pub retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            pacing_ms: DEFAULT_PACING_MS,
            retries: DEFAULT_RETRIES,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Motion and liveness policy of the axis controller (`[axis]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisConfig {
    #[serde(default = "d_handshake_interval")]
    pub handshake_interval_ms: u64,
    /// Upper bound on the identification handshake; 0 retries forever.
    #[serde(default = "d_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "d_busy_poll")]
    pub busy_poll_ms: u64,
    #[serde(default = "d_position_timeout")]
    pub position_timeout_ms: u64,
    #[serde(default = "d_home_poll")]
    pub home_poll_ms: u64,
    #[serde(default = "d_home_timeout")]
    pub home_timeout_ms: u64,
    #[serde(default = "d_position_poll")]
    pub position_poll_ms: u64,
    /// Consecutive unchanged position reads that count as a stall.
    #[serde(default = "d_stall_repeats")]
    pub stall_repeats: u32,
    #[serde(default = "d_move_timeout")]
    pub move_timeout_ms: u64,
    /// Pause between homing and the post-home position check.
    #[serde(default = "d_home_settle")]
    pub home_settle_ms: u64,
    #[serde(default = "d_liveness_window")]
    pub liveness_window_ms: u64,
    #[serde(default = "d_ping_interval")]
    pub ping_interval_ms: u64,
    #[serde(default = "d_ping_quiet")]
    pub ping_quiet_ms: u64,
    #[serde(default = "d_calibration_target")]
    pub calibration_target: i64,
    #[serde(default = "d_calibration_poll")]
    pub calibration_poll_ms: u64,
    #[serde(default = "d_calibration_margin")]
    pub calibration_settle_margin_ms: u64,
    /// Wire command that halts all motion, if the firmware has one.
    #[serde(default)]
    pub stop_command: Option<String>,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            handshake_interval_ms: DEFAULT_HANDSHAKE_INTERVAL_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            busy_poll_ms: DEFAULT_BUSY_POLL_MS,
            position_timeout_ms: DEFAULT_POSITION_TIMEOUT_MS,
            home_poll_ms: DEFAULT_HOME_POLL_MS,
            home_timeout_ms: DEFAULT_HOME_TIMEOUT_MS,
            position_poll_ms: DEFAULT_POSITION_POLL_MS,
            stall_repeats: DEFAULT_STALL_REPEATS,
            move_timeout_ms: DEFAULT_MOVE_TIMEOUT_MS,
            home_settle_ms: DEFAULT_HOME_SETTLE_MS,
            liveness_window_ms: DEFAULT_LIVENESS_WINDOW_MS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            ping_quiet_ms: DEFAULT_PING_QUIET_MS,
            calibration_target: DEFAULT_CALIBRATION_TARGET,
            calibration_poll_ms: DEFAULT_CALIBRATION_POLL_MS,
            calibration_settle_margin_ms: DEFAULT_CALIBRATION_SETTLE_MARGIN_MS,
            stop_command: None,
        }
    }
}

impl AxisConfig {
    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms)
    }
    /// `None` when the handshake is unbounded.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_ms > 0).then(|| Duration::from_millis(self.handshake_timeout_ms))
    }
    pub fn busy_poll(&self) -> Duration {
        Duration::from_millis(self.busy_poll_ms)
    }
    pub fn position_timeout(&self) -> Duration {
        Duration::from_millis(self.position_timeout_ms)
    }
    pub fn home_poll(&self) -> Duration {
        Duration::from_millis(self.home_poll_ms)
    }
    pub fn home_timeout(&self) -> Duration {
        Duration::from_millis(self.home_timeout_ms)
    }
    pub fn position_poll(&self) -> Duration {
        Duration::from_millis(self.position_poll_ms)
    }
    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }
    pub fn home_settle(&self) -> Duration {
        Duration::from_millis(self.home_settle_ms)
    }
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
    pub fn ping_quiet(&self) -> Duration {
        Duration::from_millis(self.ping_quiet_ms)
    }
    pub fn calibration_poll(&self) -> Duration {
        Duration::from_millis(self.calibration_poll_ms)
    }
    pub fn calibration_settle_margin(&self) -> Duration {
        Duration::from_millis(self.calibration_settle_margin_ms)
    }
}

/// Supervisor loop intervals (`[supervisor]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Minimum gap between two construction attempts.
    #[serde(default = "d_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "d_health_check_interval")]
    pub health_check_interval_ms: u64,
    /// Sleep between supervisor passes.
    #[serde(default = "d_supervisor_tick")]
    pub tick_ms: u64,
    /// How often the runner checks that the host is still alive.
    #[serde(default = "d_host_check_interval")]
    pub host_check_interval_ms: u64,
    #[serde(default = "d_watchdog_tick")]
    pub watchdog_tick_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            tick_ms: DEFAULT_SUPERVISOR_TICK_MS,
            host_check_interval_ms: DEFAULT_HOST_CHECK_INTERVAL_MS,
            watchdog_tick_ms: DEFAULT_WATCHDOG_TICK_MS,
        }
    }
}

impl SupervisorConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
    pub fn host_check_interval(&self) -> Duration {
        Duration::from_millis(self.host_check_interval_ms)
    }
    pub fn watchdog_tick(&self) -> Duration {
        Duration::from_millis(self.watchdog_tick_ms)
    }
}

/// Complete rig configuration loaded from `rig.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    pub controller: ControllerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub axis: AxisConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl RigConfig {
    /// Configuration with defaults for everything but the controller endpoint.
    pub fn new(host: impl Into<String>, port: u16, steps_per_unit: u32) -> Self {
        Self {
            shared: SharedConfig::default(),
            controller: ControllerConfig {
                host: host.into(),
                port,
                steps_per_unit,
            },
            transport: TransportConfig::default(),
            axis: AxisConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }

    /// Load from file, apply process environment overrides, then validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Replace controller values with the ones found through `lookup`.
    ///
    /// Keys are [`ENV_CONTROLLER_HOST`], [`ENV_CONTROLLER_PORT`] and
    /// [`ENV_STEPS_PER_UNIT`]. Values that are present but unparsable are
    /// rejected rather than ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_CONTROLLER_HOST) {
            self.controller.host = host.trim().to_string();
        }
        if let Some(port) = lookup(ENV_CONTROLLER_PORT) {
            self.controller.port = port.trim().parse().map_err(|e| {
                ConfigError::ValidationError(format!("{ENV_CONTROLLER_PORT}={port:?}: {e}"))
            })?;
        }
        if let Some(steps) = lookup(ENV_STEPS_PER_UNIT) {
            self.controller.steps_per_unit = steps.trim().parse().map_err(|e| {
                ConfigError::ValidationError(format!("{ENV_STEPS_PER_UNIT}={steps:?}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Validate the rig configuration.
    ///
    /// # Validation Rules
    /// 1. `shared` is valid
    /// 2. controller host non-empty, port > 0, steps_per_unit > 0
    /// 3. transport retries > 0, response timeout > 0
    /// 4. stall_repeats > 0
    /// 5. liveness window longer than the ping quiet interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.controller.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "controller.host cannot be empty".to_string(),
            ));
        }
        if self.controller.port == 0 {
            return Err(ConfigError::ValidationError(
                "controller.port must be greater than 0".to_string(),
            ));
        }
        if self.controller.steps_per_unit == 0 {
            return Err(ConfigError::ValidationError(
                "controller.steps_per_unit must be greater than 0".to_string(),
            ));
        }
        if self.transport.retries == 0 {
            return Err(ConfigError::ValidationError(
                "transport.retries must be greater than 0".to_string(),
            ));
        }
        if self.transport.response_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "transport.response_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.axis.stall_repeats == 0 {
            return Err(ConfigError::ValidationError(
                "axis.stall_repeats must be greater than 0".to_string(),
            ));
        }
        if self.axis.liveness_window_ms <= self.axis.ping_quiet_ms {
            return Err(ConfigError::ValidationError(format!(
                "axis.liveness_window_ms ({}) must exceed axis.ping_quiet_ms ({})",
                self.axis.liveness_window_ms, self.axis.ping_quiet_ms
            )));
        }
        Ok(())
    }
}
