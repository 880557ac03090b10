//! Top-level device runner.
//!
//! One OS thread per supervised device kind drives its supervisor until the
//! shared keep-alive flag drops, then tears its slot down. A second, faster
//! watchdog thread only checks whether the host application is still there
//! and drops the flag when it is not. Device threads never learn why they
//! are stopping; they only observe the flag.

use crate::supervisor::Supervised;
use beamrig_common::clock::Clock;
use beamrig_common::config::SupervisorConfig;
use beamrig_common::watchdog::WatchdogError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

// ─── Host liveness ──────────────────────────────────────────────────

/// Held by the host application for as long as it is running.
///
/// Dropping the lease (including by unwinding out of the host's main loop)
/// is what the runner's watchdog detects as "host gone".
#[derive(Debug)]
pub struct HostLease {
    token: Arc<()>,
}

impl HostLease {
    pub fn new() -> Self {
        Self {
            token: Arc::new(()),
        }
    }

    /// Weak observer handed to the runner.
    pub fn watch(&self) -> HostWatch {
        HostWatch {
            token: Arc::downgrade(&self.token),
        }
    }
}

impl Default for HostLease {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer of a [`HostLease`].
#[derive(Debug, Clone)]
pub struct HostWatch {
    token: Weak<()>,
}

impl HostWatch {
    pub fn is_alive(&self) -> bool {
        self.token.strong_count() > 0
    }
}

// ─── Runner ─────────────────────────────────────────────────────────

/// Handle to the running device and watchdog threads.
pub struct RunnerHandle {
    keep_alive: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

/// Start one thread per supervisor plus the host watchdog.
///
/// `keep_alive` must be `true` on entry; clearing it from anywhere stops
/// every thread.
pub fn spawn(
    supervisors: Vec<Box<dyn Supervised>>,
    host: HostWatch,
    keep_alive: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
) -> Result<RunnerHandle, WatchdogError> {
    let mut handle = RunnerHandle {
        keep_alive: Arc::clone(&keep_alive),
        threads: Vec::with_capacity(supervisors.len() + 1),
    };

    for supervisor in supervisors {
        let kind = supervisor.kind();
        let keep_alive = Arc::clone(&keep_alive);
        let clock = Arc::clone(&clock);
        let config = config.clone();
        let spawned = thread::Builder::new()
            .name(kind.as_str().to_string())
            .spawn(move || device_loop(supervisor, keep_alive, clock, config));
        match spawned {
            Ok(thread) => handle.threads.push(thread),
            Err(e) => {
                // Dropping the handle stops the threads started so far.
                return Err(WatchdogError::StartFailed {
                    kind,
                    reason: e.to_string(),
                });
            }
        }
    }

    let watchdog = thread::Builder::new()
        .name("host-watchdog".into())
        .spawn(move || watchdog_loop(host, keep_alive, clock, config))
        .map_err(|e| WatchdogError::Other(format!("failed to start host watchdog: {e}")))?;
    handle.threads.push(watchdog);

    info!("Device runner started ({} threads)", handle.threads.len());
    Ok(handle)
}

fn device_loop(
    mut supervisor: Box<dyn Supervised>,
    keep_alive: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
) {
    info!("{} supervisor running", supervisor.kind());
    while keep_alive.load(Ordering::SeqCst) {
        let outcome = supervisor.run_once();
        debug!("{} pass: {:?}", supervisor.kind(), outcome);
        clock.sleep(config.tick());
    }
    supervisor.shutdown();
}

fn watchdog_loop(
    host: HostWatch,
    keep_alive: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
) {
    let mut last_check: Option<Instant> = None;
    while keep_alive.load(Ordering::SeqCst) {
        let due = last_check.is_none_or(|at| clock.since(at) >= config.host_check_interval());
        if due {
            last_check = Some(clock.now());
            if !host.is_alive() {
                warn!("Host application is gone, stopping devices");
                keep_alive.store(false, Ordering::SeqCst);
                break;
            }
        }
        clock.sleep(config.watchdog_tick());
    }
    debug!("Host watchdog exiting");
}

impl RunnerHandle {
    /// `true` until the keep-alive flag drops.
    pub fn is_running(&self) -> bool {
        self.keep_alive.load(Ordering::SeqCst)
    }

    /// Drop the keep-alive flag and join every thread.
    pub fn stop(&mut self) {
        self.keep_alive.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Wait for every thread to exit without stopping them.
    pub fn join(&mut self) {
        for thread in self.threads.drain(..) {
            let name = thread.thread().name().unwrap_or("runner").to_string();
            if thread.join().is_err() {
                warn!("{} thread panicked", name);
            }
        }
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_follows_the_lease() {
        let lease = HostLease::new();
        let watch = lease.watch();
        let copy = watch.clone();
        assert!(watch.is_alive());
        drop(lease);
        assert!(!watch.is_alive());
        assert!(!copy.is_alive());
    }
}
