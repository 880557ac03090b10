//! Device registry: one published slot per supervised device kind.
//!
//! The supervisor is the only writer; consumers read. Each slot has two
//! locks: a construction lock serialising build and teardown, and a short
//! publication lock around the published instance. Reads only take the
//! latter, so they never wait behind a connect or handshake, and a device
//! becomes visible only once it is fully built.

use beamrig_common::clock::Clock;
use beamrig_common::device::{Device, DeviceError};
use beamrig_common::watchdog::{DeviceKind, HealthStatus};
use beamrig_hal::AxisController;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of [`DeviceSlot::install_with`].
pub enum Install<D> {
    /// The builder ran and its device is now published.
    Installed(Arc<D>),
    /// Another pass won the race; this one's device (if any) was discarded.
    Occupied(Arc<D>),
}

struct Published<D> {
    device: Arc<D>,
    /// Last time the supervisor saw this device pass a liveness check.
    verified_at: Instant,
}

/// Slot holding the current instance of one device kind.
pub struct DeviceSlot<D> {
    kind: DeviceKind,
    /// Held across build and teardown only.
    construction: Mutex<()>,
    /// Held for pointer-sized critical sections only.
    current: Mutex<Option<Published<D>>>,
}

impl<D: Device> DeviceSlot<D> {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            construction: Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Current instance, if one is published. Never waits on construction.
    pub fn get(&self) -> Option<Arc<D>> {
        self.current.lock().as_ref().map(|p| Arc::clone(&p.device))
    }

    pub fn is_occupied(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Replace the slot content, returning the previous instance untouched.
    ///
    /// The caller owns whatever comes back, including disconnecting it.
    pub fn set(&self, device: Option<Arc<D>>, now: Instant) -> Option<Arc<D>> {
        let next = device.map(|device| Published {
            device,
            verified_at: now,
        });
        std::mem::replace(&mut *self.current.lock(), next).map(|p| p.device)
    }

    /// Build and publish a device unless the slot is already occupied.
    ///
    /// Constructions of one slot are serialised, so two racing passes never
    /// both build; the loser sees the winner's device. `build` runs outside
    /// the publication lock, so readers keep getting `None` meanwhile.
    pub fn install_with<F>(&self, now: Instant, build: F) -> Result<Install<D>, DeviceError>
    where
        F: FnOnce() -> Result<D, DeviceError>,
    {
        let _building = self.construction.lock();
        if let Some(existing) = self.get() {
            debug!("{} slot already occupied", self.kind);
            return Ok(Install::Occupied(existing));
        }

        let device = Arc::new(build()?);

        let mut current = self.current.lock();
        if let Some(published) = current.as_ref() {
            // Published through `set` while we were building.
            let existing = Arc::clone(&published.device);
            drop(current);
            warn!("{} was published during construction, discarding ours", self.kind);
            device.disconnect();
            return Ok(Install::Occupied(existing));
        }
        *current = Some(Published {
            device: Arc::clone(&device),
            verified_at: now,
        });
        drop(current);
        info!("{} published", self.kind);
        Ok(Install::Installed(device))
    }

    /// Record a passed liveness check for `device` if it is still the
    /// published instance.
    pub fn mark_verified(&self, device: &Arc<D>, now: Instant) {
        if let Some(published) = self.current.lock().as_mut() {
            if Arc::ptr_eq(&published.device, device) {
                published.verified_at = now;
            }
        }
    }

    /// Unpublish and disconnect `expected`.
    ///
    /// Returns `false` (and leaves the slot alone) when the slot no longer
    /// holds that exact instance. Readers see an empty slot before the
    /// disconnect starts.
    pub fn teardown(&self, expected: &Arc<D>) -> bool {
        let _building = self.construction.lock();
        let removed = {
            let mut current = self.current.lock();
            match current.as_ref() {
                Some(published) if Arc::ptr_eq(&published.device, expected) => {
                    current.take().map(|p| p.device)
                }
                _ => None,
            }
        };
        match removed {
            Some(device) => {
                device.disconnect();
                info!("{} torn down", self.kind);
                true
            }
            None => false,
        }
    }

    /// Unpublish and disconnect whatever is in the slot.
    pub fn clear(&self) -> bool {
        let _building = self.construction.lock();
        let removed = self.current.lock().take();
        match removed {
            Some(published) => {
                published.device.disconnect();
                info!("{} cleared", self.kind);
                true
            }
            None => false,
        }
    }

    /// Slot health as seen by the supervisor.
    ///
    /// A published device whose last passed check is older than `window` is
    /// reported as stale (the supervisor thread is blocked or behind).
    pub fn health(&self, clock: &dyn Clock, window: Duration) -> HealthStatus {
        match self.current.lock().as_ref() {
            None => HealthStatus::Absent,
            Some(published) => {
                let since = clock.since(published.verified_at);
                if since <= window {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Stale {
                        since_last_response: Some(since),
                    }
                }
            }
        }
    }
}

/// Registry of every supervised device kind.
///
/// Owned by the application context and shared with the supervisor threads;
/// there is no global instance.
pub struct DeviceRegistry {
    axis: Arc<DeviceSlot<AxisController>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            axis: Arc::new(DeviceSlot::new(DeviceKind::AxisController)),
        }
    }

    /// Slot of the axis controller.
    pub fn axis(&self) -> &Arc<DeviceSlot<AxisController>> {
        &self.axis
    }

    /// Health of the slot for `kind`.
    pub fn health(&self, kind: DeviceKind, clock: &dyn Clock, window: Duration) -> HealthStatus {
        match kind {
            DeviceKind::AxisController => self.axis.health(clock, window),
        }
    }

    /// Tear down every published device.
    pub fn clear_all(&self) {
        self.axis.clear();
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
