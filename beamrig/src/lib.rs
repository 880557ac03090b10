//! # Beamrig Device Layer
//!
//! Keeps the axis controller connected for the rest of the application:
//! a registry slot per device kind, a supervisor that builds and health-checks
//! what goes into it, the runner threads driving the supervisors, and the
//! [`AxisService`] facade consumers call.
//!
//! # Module Structure
//!
//! - [`registry`] - `DeviceSlot` and `DeviceRegistry`
//! - [`supervisor`] - `DeviceSupervisor` and the object-safe `Supervised` trait
//! - [`runner`] - device threads, host watchdog, `HostLease`
//! - [`context`] - `AppContext`, created once at startup
//! - [`service`] - `AxisService` and `ServiceError`
//!
//! # Threads
//!
//! ```text
//!   host thread(s)                      runner threads
//! ┌──────────────────┐          ┌──────────────────────────────┐
//! │ HostLease        │◄─ weak ──│ host-watchdog                │
//! │ AxisService      │          │   └─► keep_alive = false     │
//! └────────┬─────────┘          │ axis_controller supervisor   │
//!          │ get                └──────────────┬───────────────┘
//!          ▼                                   │ install / teardown
//! ┌────────────────────────────────────────────▼─┐
//! │ DeviceSlot<AxisController>                    │
//! │   construction lock + publication lock        │
//! └───────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod registry;
pub mod runner;
pub mod service;
pub mod supervisor;

pub use crate::context::AppContext;
pub use crate::registry::{DeviceRegistry, DeviceSlot};
pub use crate::runner::{HostLease, HostWatch};
pub use crate::service::{AxisService, ServiceError};
pub use crate::supervisor::{DeviceSupervisor, PassOutcome, Supervised};
