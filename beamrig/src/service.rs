//! Axis service: the surface UI and measurement code talk to.
//!
//! Every operation resolves the controller currently published in the
//! registry. "Nothing published" is [`ServiceError::NotConnected`], which is
//! distinct from a published controller rejecting the command
//! ([`ServiceError::Axis`]).

use crate::context::AppContext;
use beamrig_common::watchdog::WatchdogError;
use beamrig_hal::poll::StopSignal;
use beamrig_hal::{AxisController, AxisError, Calibration};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors surfaced by [`AxisService`].
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// No controller is currently published.
    #[error("axis controller is not connected")]
    NotConnected,

    /// `connect` gave up waiting for a controller.
    #[error("axis controller not available after {waited:?}")]
    Unavailable { waited: Duration },

    /// A controller was acquired but failed its own liveness check.
    #[error("axis controller acquired but not alive")]
    NotAlive,

    /// The device layer could not be started.
    #[error("device manager failed: {0}")]
    Start(#[from] WatchdogError),

    /// The controller rejected or failed the command.
    #[error(transparent)]
    Axis(#[from] AxisError),
}

/// Facade over the supervised axis controller.
pub struct AxisService {
    context: Arc<AppContext>,
    /// Aborts waits in `connect`/`wait_for_axis_controller` on [`AxisService::cancel`].
    waits: StopSignal,
}

impl AxisService {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            context,
            waits: StopSignal::new(),
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// Start the device layer and wait up to `timeout` for a live controller.
    pub fn connect(&self, timeout: Duration) -> Result<Arc<AxisController>, ServiceError> {
        self.context.start_devices()?;

        let poll_interval = self.context.config().supervisor.tick();
        let controller = match self
            .context
            .wait_for_axis(self.waits.token(), timeout, poll_interval)
        {
            Ok(controller) => controller,
            Err(WatchdogError::ReadyTimeout { .. }) => {
                warn!("No axis controller after {:?}", timeout);
                return Err(ServiceError::Unavailable { waited: timeout });
            }
            Err(e) => return Err(e.into()),
        };

        if !controller.is_device_alive() {
            return Err(ServiceError::NotAlive);
        }
        info!("Axis service connected");
        Ok(controller)
    }

    /// Poll the registry until a controller is published or `timeout` elapses.
    ///
    /// Does not start the device layer. Returns `None` on timeout, on
    /// [`AxisService::cancel`], or once the context is shutting down.
    pub fn wait_for_axis_controller(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<Arc<AxisController>> {
        self.context
            .wait_for_axis(self.waits.token(), timeout, poll_interval)
            .ok()
    }

    /// Abort every wait currently in progress.
    pub fn cancel(&self) {
        self.waits.raise();
    }

    /// Published controller, or [`ServiceError::NotConnected`].
    pub fn controller(&self) -> Result<Arc<AxisController>, ServiceError> {
        self.context
            .registry()
            .axis()
            .get()
            .ok_or(ServiceError::NotConnected)
    }

    /// `true` when a controller is published and answers within its window.
    pub fn is_alive(&self) -> bool {
        self.controller().is_ok_and(|c| c.is_device_alive())
    }

    pub fn go_to(&self, axis: u8, target: i64, wait: bool) -> Result<(), ServiceError> {
        Ok(self.controller()?.go_to_position(axis, target, wait)?)
    }

    pub fn home(&self, axis: u8) -> Result<(), ServiceError> {
        Ok(self.controller()?.home(axis)?)
    }

    pub fn position(&self, axis: u8) -> Result<i64, ServiceError> {
        Ok(self.controller()?.get_position(axis)?)
    }

    pub fn stop_all(&self) -> Result<(), ServiceError> {
        Ok(self.controller()?.stop_all()?)
    }

    /// Calibration never fails as a whole; a partial result carries the cause.
    pub fn initialize_axis(&self, axis: u8) -> Result<Calibration, ServiceError> {
        Ok(self.controller()?.initialize_axis(axis))
    }
}
