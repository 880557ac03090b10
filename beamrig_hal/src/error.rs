//! Error types for axis controller operations.

use crate::poll::Interrupted;
use crate::protocol::ProtocolError;
use beamrig_common::device::DeviceError;
use std::time::Duration;
use thiserror::Error;

/// Error type for [`crate::axis::AxisController`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AxisError {
    /// The transport could not be opened or has dropped.
    #[error("controller not connected")]
    NotConnected,

    /// Identification never returned the firmware signature.
    #[error("controller did not identify within {waited:?}")]
    HandshakeTimeout { waited: Duration },

    /// The controller kept answering `BUSY`.
    #[error("timeout waiting for {operation} (controller keeps returning BUSY after {waited:?})")]
    BusyTimeout {
        operation: &'static str,
        waited: Duration,
    },

    /// Reply could not be interpreted.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Homing finished but the axis did not report position 0.
    #[error("failed to go home: axis {axis} reports {position}")]
    NotHomed { axis: u8, position: i64 },

    /// Position stopped changing before reaching the target.
    #[error(
        "failed to go to position (position not changing): axis {axis} stuck at {position} for {repeats} reads"
    )]
    Stalled { axis: u8, position: i64, repeats: u32 },

    /// Convergence wait exceeded its overall bound.
    #[error("axis {axis} did not reach {target} within {waited:?}")]
    MoveTimeout {
        axis: u8,
        target: i64,
        waited: Duration,
    },

    /// A stop request interrupted the operation.
    #[error("operation aborted by stop request")]
    Aborted,
}

impl From<Interrupted> for AxisError {
    fn from(_: Interrupted) -> Self {
        AxisError::Aborted
    }
}

impl From<AxisError> for DeviceError {
    fn from(err: AxisError) -> Self {
        match err {
            AxisError::NotConnected => DeviceError::ConnectFailed(err.to_string()),
            AxisError::HandshakeTimeout { .. } => DeviceError::HandshakeFailed(err.to_string()),
            other => DeviceError::CommunicationError(other.to_string()),
        }
    }
}
