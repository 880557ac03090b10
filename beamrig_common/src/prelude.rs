//! Prelude module for common re-exports.
//!
//! ```rust
//! use beamrig_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    AxisConfig, ConfigError, ConfigLoader, ControllerConfig, LogLevel, RigConfig, SharedConfig,
    SupervisorConfig, TransportConfig,
};

// ─── Time ───────────────────────────────────────────────────────────
pub use crate::clock::{Clock, ManualClock, SystemClock};

// ─── Devices & supervision ──────────────────────────────────────────
pub use crate::device::{Device, DeviceError, DeviceFactory};
pub use crate::watchdog::{DeviceKind, HealthStatus, WatchdogError};

// ─── Protocol constants ─────────────────────────────────────────────
pub use crate::consts::{FIRMWARE_ID, NOT_REFERENCED};
