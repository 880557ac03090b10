//! # Beamrig HAL Library
//!
//! Client side of the six-axis stage controller: socket transport, reply
//! framing, the command codec, and the motion state machine built on them.
//!
//! # Module Structure
//!
//! - [`framing`] - Reply termination over an unframed byte stream
//! - [`transport`] - `Link` trait and the TCP transport
//! - [`protocol`] - Command builders and reply parsing (pure)
//! - [`poll`] - Bounded sleep-and-retry helper with stop tokens
//! - [`axis`] - `AxisController` (handshake, liveness, homing, moves, calibration)
//! - [`laser`] / [`cooler`] - Auxiliary devices behind the same controller
//! - [`simulation`] - Simulated controller speaking the wire protocol
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        beamrig_hal                         │
//! │  ┌────────────────┐   ┌────────────────┐   ┌────────────┐  │
//! │  │ LaserService   │──►│ AxisController │◄──│  protocol  │  │
//! │  │ CoolerReadings │   │ (poll helper)  │   │   (pure)   │  │
//! │  └────────────────┘   └───────┬────────┘   └────────────┘  │
//! │                               ▼                            │
//! │                       ┌────────────────┐   ┌────────────┐  │
//! │                       │  Link (trait)  │──►│  framing   │  │
//! │                       │  TcpTransport  │   └────────────┘  │
//! │                       └────────────────┘                   │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod axis;
pub mod cooler;
pub mod error;
pub mod framing;
pub mod laser;
pub mod poll;
pub mod protocol;
pub mod simulation;
pub mod transport;

// Re-export key types for convenience
pub use crate::axis::{AxisController, Calibration, ControllerSettings, ControllerState};
pub use crate::error::AxisError;
pub use crate::transport::{Link, TcpTransport};
