//! # Supervision Vocabulary
//!
//! Types shared between the device supervisor and its consumers: which
//! device kinds are supervised, what a health check can conclude, and the
//! error type for supervision operations.

use std::fmt;
use std::time::Duration;

use crate::config::ConfigError;

/// Identifies a supervised device kind (one registry slot each).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Motorised linear stage controller (also hosts laser and cooler commands).
    AxisController,
}

impl DeviceKind {
    /// Stable identifier used for thread names and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::AxisController => "axis_controller",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status of a registry slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// A device is published and its last liveness check passed.
    Healthy,
    /// A device is published but has not answered within the liveness window.
    Stale {
        /// Time since the last successful exchange, if there ever was one.
        since_last_response: Option<Duration>,
    },
    /// The slot is empty (under construction or absent).
    Absent,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Error type for supervision operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchdogError {
    /// The device runner could not be started.
    #[error("failed to start {kind}: {reason}")]
    StartFailed { kind: DeviceKind, reason: String },

    /// No device was published within the expected timeout.
    #[error("{kind} not ready after {timeout_s:.1}s")]
    ReadyTimeout { kind: DeviceKind, timeout_s: f64 },

    /// Startup configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Generic error.
    #[error("watchdog error: {0}")]
    Other(String),
}
