//! Per-device supervision pass.
//!
//! One [`DeviceSupervisor`] owns the construction and health-check policy of
//! one registry slot. The runner calls [`Supervised::run_once`] on every tick;
//! all timing comes from the injected clock, so a pass is fully deterministic
//! under a manual clock.

use crate::registry::{DeviceSlot, Install};
use beamrig_common::clock::Clock;
use beamrig_common::config::SupervisorConfig;
use beamrig_common::device::{Device, DeviceFactory};
use beamrig_common::watchdog::DeviceKind;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What one supervision pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// No interval had elapsed.
    Idle,
    /// A fresh device was built and published.
    Constructed,
    /// The factory failed or panicked; the slot stays empty.
    ConstructionFailed,
    /// Another pass published a device first.
    AlreadyPresent,
    /// The published device passed its liveness check.
    Healthy,
    /// The published device failed its check and was removed.
    TornDown,
}

/// Object-safe view of a supervisor, so the runner can drive every device
/// kind through one loop.
pub trait Supervised: Send {
    fn kind(&self) -> DeviceKind;

    /// Run one pass: construct if due and absent, health-check if due and present.
    fn run_once(&mut self) -> PassOutcome;

    /// Final teardown of whatever is published.
    fn shutdown(&mut self);
}

/// Construction and health policy for one device slot.
pub struct DeviceSupervisor<D: Device> {
    slot: Arc<DeviceSlot<D>>,
    factory: DeviceFactory<D>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
    last_attempt: Option<Instant>,
    last_check: Option<Instant>,
}

impl<D: Device> DeviceSupervisor<D> {
    pub fn new(
        slot: Arc<DeviceSlot<D>>,
        factory: DeviceFactory<D>,
        clock: Arc<dyn Clock>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            slot,
            factory,
            clock,
            config,
            last_attempt: None,
            last_check: None,
        }
    }

    pub fn slot(&self) -> &Arc<DeviceSlot<D>> {
        &self.slot
    }

    fn due(&self, last: Option<Instant>, interval: std::time::Duration) -> bool {
        last.is_none_or(|at| self.clock.since(at) >= interval)
    }

    fn construct(&mut self) -> PassOutcome {
        let now = self.clock.now();
        self.last_attempt = Some(now);
        debug!("Constructing {}", self.slot.kind());

        let factory = &self.factory;
        let slot = &self.slot;
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| slot.install_with(now, || factory())));

        match attempt {
            Ok(Ok(Install::Installed(device))) => {
                // The first health check is one interval after construction.
                self.last_check = Some(self.clock.now());
                info!("{} connected ({})", self.slot.kind(), device.name());
                PassOutcome::Constructed
            }
            Ok(Ok(Install::Occupied(_))) => PassOutcome::AlreadyPresent,
            Ok(Err(e)) => {
                warn!("{} construction failed: {}", self.slot.kind(), e);
                PassOutcome::ConstructionFailed
            }
            Err(payload) => {
                error!(
                    "{} construction panicked: {}",
                    self.slot.kind(),
                    panic_message(&payload)
                );
                PassOutcome::ConstructionFailed
            }
        }
    }

    fn check(&mut self, device: Arc<D>) -> PassOutcome {
        self.last_check = Some(self.clock.now());

        let verdict = panic::catch_unwind(AssertUnwindSafe(|| device.is_alive()));
        match verdict {
            Ok(true) => {
                self.slot.mark_verified(&device, self.clock.now());
                PassOutcome::Healthy
            }
            Ok(false) => {
                error!("{} failed its liveness check", self.slot.kind());
                self.remove(&device)
            }
            Err(payload) => {
                error!(
                    "{} liveness check panicked: {}",
                    self.slot.kind(),
                    panic_message(&payload)
                );
                self.remove(&device)
            }
        }
    }

    fn remove(&self, device: &Arc<D>) -> PassOutcome {
        let slot = &self.slot;
        if panic::catch_unwind(AssertUnwindSafe(|| slot.teardown(device))).is_err() {
            // disconnect() itself panicked; unpublish without it.
            error!("{} disconnect panicked", self.slot.kind());
            slot.set(None, self.clock.now());
        }
        PassOutcome::TornDown
    }
}

impl<D: Device> Supervised for DeviceSupervisor<D> {
    fn kind(&self) -> DeviceKind {
        self.slot.kind()
    }

    fn run_once(&mut self) -> PassOutcome {
        match self.slot.get() {
            None if self.due(self.last_attempt, self.config.reconnect_interval()) => {
                self.construct()
            }
            Some(device) if self.due(self.last_check, self.config.health_check_interval()) => {
                self.check(device)
            }
            _ => PassOutcome::Idle,
        }
    }

    fn shutdown(&mut self) {
        let slot = &self.slot;
        if panic::catch_unwind(AssertUnwindSafe(|| slot.clear())).is_err() {
            error!("{} disconnect panicked during shutdown", self.slot.kind());
            slot.set(None, self.clock.now());
        }
        info!("{} supervisor stopped", self.slot.kind());
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::FakeDevice;
    use beamrig_common::clock::ManualClock;
    use beamrig_common::device::DeviceError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            reconnect_interval_ms: 5_000,
            health_check_interval_ms: 500,
            ..SupervisorConfig::default()
        }
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&payload), "non-string panic payload");
    }

    #[test]
    fn construction_waits_for_the_reconnect_interval() {
        let clock = ManualClock::shared();
        let slot = Arc::new(DeviceSlot::new(DeviceKind::AxisController));
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory: DeviceFactory<FakeDevice> = {
            let attempts = Arc::clone(&attempts);
            Box::new(move || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(DeviceError::ConnectFailed("refused".into()))
            })
        };
        let mut supervisor = DeviceSupervisor::new(slot, factory, clock.clone(), config());

        assert_eq!(supervisor.run_once(), PassOutcome::ConstructionFailed);
        clock.advance(Duration::from_millis(4_999));
        assert_eq!(supervisor.run_once(), PassOutcome::Idle);
        clock.advance(Duration::from_millis(1));
        assert_eq!(supervisor.run_once(), PassOutcome::ConstructionFailed);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
