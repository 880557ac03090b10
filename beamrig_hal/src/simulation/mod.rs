//! Simulated axis controller.
//!
//! Speaks the controller's line protocol over TCP so the transport, the
//! controller and the supervisor can be exercised without hardware.

mod server;
mod stage;

pub use server::{SimulatorHandle, spawn};
pub use stage::{
    COOLER_READINGS, HomingState, LASER_INFO, SimulatedController, StageAxis, StageConfig,
};

/// Start a simulator on an ephemeral localhost port.
pub fn spawn_local(config: StageConfig) -> std::io::Result<SimulatorHandle> {
    spawn("127.0.0.1:0", config)
}
