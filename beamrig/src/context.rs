//! Application context: everything the device layer shares, created once at
//! startup and torn down once at shutdown.

use crate::registry::DeviceRegistry;
use crate::runner::{self, HostWatch, RunnerHandle};
use crate::supervisor::{DeviceSupervisor, Supervised};
use beamrig_common::clock::Clock;
use beamrig_common::config::RigConfig;
use beamrig_common::device::{DeviceError, DeviceFactory};
use beamrig_common::watchdog::{DeviceKind, HealthStatus, WatchdogError};
use beamrig_hal::AxisController;
use beamrig_hal::poll::{self, Interrupted, PollPolicy, Step, StopToken};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Shared state of the device layer.
///
/// Passed explicitly (usually as `Arc<AppContext>`) to the service layer and
/// the binary; there is no global instance.
pub struct AppContext {
    config: RigConfig,
    clock: Arc<dyn Clock>,
    registry: DeviceRegistry,
    /// Cleared on shutdown (Ctrl+C, host gone, or [`AppContext::shutdown`]).
    keep_alive: Arc<AtomicBool>,
    host: HostWatch,
    /// Taken by the first successful `start_devices`.
    axis_factory: Mutex<Option<DeviceFactory<AxisController>>>,
    runner: Mutex<Option<RunnerHandle>>,
}

impl AppContext {
    /// Context whose axis controller is built over TCP from `config`.
    pub fn new(config: RigConfig, clock: Arc<dyn Clock>, host: HostWatch) -> Self {
        let factory = tcp_axis_factory(config.clone(), Arc::clone(&clock));
        Self::with_axis_factory(config, clock, host, factory)
    }

    /// Context with a custom axis controller factory.
    pub fn with_axis_factory(
        config: RigConfig,
        clock: Arc<dyn Clock>,
        host: HostWatch,
        axis_factory: DeviceFactory<AxisController>,
    ) -> Self {
        Self {
            config,
            clock,
            registry: DeviceRegistry::new(),
            keep_alive: Arc::new(AtomicBool::new(true)),
            host,
            axis_factory: Mutex::new(Some(axis_factory)),
            runner: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Shared keep-alive flag (for signal handlers).
    pub fn keep_alive(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.keep_alive)
    }

    /// `false` once shutdown has been requested by anyone.
    pub fn is_running(&self) -> bool {
        self.keep_alive.load(Ordering::SeqCst)
    }

    /// `true` while the device runner threads exist.
    pub fn devices_started(&self) -> bool {
        self.runner.lock().is_some()
    }

    /// Validate the configuration and start the device runner.
    ///
    /// Idempotent: a second call while running is a no-op. Fails after
    /// shutdown has been requested.
    pub fn start_devices(&self) -> Result<(), WatchdogError> {
        let mut runner = self.runner.lock();
        if !self.is_running() {
            return Err(WatchdogError::Other("context is shutting down".to_string()));
        }
        if runner.is_some() {
            return Ok(());
        }

        self.config.validate()?;

        let factory = self
            .axis_factory
            .lock()
            .take()
            .ok_or_else(|| WatchdogError::StartFailed {
                kind: DeviceKind::AxisController,
                reason: "axis factory already consumed".to_string(),
            })?;
        let axis: Box<dyn Supervised> = Box::new(DeviceSupervisor::new(
            Arc::clone(self.registry.axis()),
            factory,
            Arc::clone(&self.clock),
            self.config.supervisor.clone(),
        ));

        let handle = runner::spawn(
            vec![axis],
            self.host.clone(),
            Arc::clone(&self.keep_alive),
            Arc::clone(&self.clock),
            self.config.supervisor.clone(),
        )?;
        *runner = Some(handle);
        info!(
            "Devices started for controller at {}",
            self.config.controller.endpoint()
        );
        Ok(())
    }

    /// Health of one device slot, judged against the liveness window.
    pub fn health(&self, kind: DeviceKind) -> HealthStatus {
        self.registry
            .health(kind, self.clock.as_ref(), self.config.axis.liveness_window())
    }

    /// Wait for the supervisor to publish an axis controller.
    ///
    /// Does not start the device layer. Fails with
    /// [`WatchdogError::ReadyTimeout`] after `timeout`, and with
    /// [`WatchdogError::Other`] when `stop` fires or the context shuts down.
    pub fn wait_for_axis(
        &self,
        stop: StopToken<'_>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Arc<AxisController>, WatchdogError> {
        let slot = self.registry.axis();
        let found = poll::poll(
            self.clock.as_ref(),
            stop,
            PollPolicy::bounded(poll_interval, timeout),
            || {
                if !self.is_running() {
                    return Err(Interrupted);
                }
                Ok(match slot.get() {
                    Some(controller) => Step::Done(controller),
                    None => Step::Pending,
                })
            },
            |_| Interrupted,
        );

        found.map_err(|Interrupted| {
            if !self.is_running() {
                WatchdogError::Other("device runner stopped".to_string())
            } else if stop.is_stopped() {
                WatchdogError::Other("wait cancelled".to_string())
            } else {
                debug!("No axis controller published within {:?}", timeout);
                WatchdogError::ReadyTimeout {
                    kind: DeviceKind::AxisController,
                    timeout_s: timeout.as_secs_f64(),
                }
            }
        })
    }

    /// Stop the runner, join its threads and tear down every device.
    pub fn shutdown(&self) {
        self.keep_alive.store(false, Ordering::SeqCst);
        let runner = self.runner.lock().take();
        if let Some(mut handle) = runner {
            handle.stop();
        }
        self.registry.clear_all();
        info!("Device layer shut down");
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        if self.runner.get_mut().is_some() {
            self.shutdown();
        }
    }
}

/// Factory connecting a fresh transport and controller on every call.
pub fn tcp_axis_factory(config: RigConfig, clock: Arc<dyn Clock>) -> DeviceFactory<AxisController> {
    Box::new(move || {
        AxisController::connect_tcp(&config, Arc::clone(&clock)).map_err(DeviceError::from)
    })
}
