//! # Supervisor Tests
//!
//! Supervision passes are driven by hand under a manual clock; the runner
//! tests use real threads with millisecond intervals.
//!
//! - Construction and reconnect interval
//! - Health-check teardown (false verdicts and panics)
//! - Single-owner registry under racing passes
//! - Host watchdog and final teardown

use beamrig::registry::DeviceSlot;
use beamrig::runner::{self, HostLease};
use beamrig::supervisor::{DeviceSupervisor, PassOutcome, Supervised};
use beamrig_common::clock::{self, Clock, ManualClock};
use beamrig_common::config::SupervisorConfig;
use beamrig_common::device::{Device, DeviceError, DeviceFactory};
use beamrig_common::watchdog::DeviceKind;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

// ─── Helpers ────────────────────────────────────────────────────────

/// Device whose liveness verdict is controlled by the test.
struct FakeDevice {
    alive: AtomicBool,
    panic_on_check: AtomicBool,
    disconnects: AtomicUsize,
}

impl FakeDevice {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            panic_on_check: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        }
    }

    fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Device for FakeDevice {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn connect(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        if self.panic_on_check.load(Ordering::SeqCst) {
            panic!("liveness check exploded");
        }
        self.alive.load(Ordering::SeqCst)
    }

    fn send_query(&self, _message: &str, _expected_lines: usize) -> Option<String> {
        None
    }

    fn identification(&self) -> Option<String> {
        Some("fake".to_string())
    }
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        reconnect_interval_ms: 5_000,
        health_check_interval_ms: 500,
        tick_ms: 100,
        host_check_interval_ms: 2_000,
        watchdog_tick_ms: 100,
    }
}

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        reconnect_interval_ms: 20,
        health_check_interval_ms: 10,
        tick_ms: 5,
        host_check_interval_ms: 20,
        watchdog_tick_ms: 5,
    }
}

fn slot() -> Arc<DeviceSlot<FakeDevice>> {
    Arc::new(DeviceSlot::new(DeviceKind::AxisController))
}

/// Factory counting its calls.
fn counting_factory(built: &Arc<AtomicUsize>) -> DeviceFactory<FakeDevice> {
    let built = Arc::clone(built);
    Box::new(move || {
        built.fetch_add(1, Ordering::SeqCst);
        Ok(FakeDevice::new())
    })
}

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ─── Construction ───────────────────────────────────────────────────

#[test]
fn empty_slot_is_filled_on_the_first_pass() {
    let clock = ManualClock::shared();
    let slot = slot();
    let built = Arc::new(AtomicUsize::new(0));
    let mut supervisor =
        DeviceSupervisor::new(Arc::clone(&slot), counting_factory(&built), clock.clone(), config());

    assert_eq!(supervisor.run_once(), PassOutcome::Constructed);
    assert!(slot.is_occupied());
    assert_eq!(supervisor.kind(), DeviceKind::AxisController);

    // Health check is not due right after construction.
    assert_eq!(supervisor.run_once(), PassOutcome::Idle);
    clock.advance(Duration::from_millis(500));
    assert_eq!(supervisor.run_once(), PassOutcome::Healthy);
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_factory_leaves_the_slot_empty() {
    let clock = ManualClock::shared();
    let slot = slot();
    let factory: DeviceFactory<FakeDevice> =
        Box::new(|| -> Result<FakeDevice, DeviceError> { panic!("driver bug") });
    let mut supervisor = DeviceSupervisor::new(Arc::clone(&slot), factory, clock.clone(), config());

    assert_eq!(supervisor.run_once(), PassOutcome::ConstructionFailed);
    assert!(!slot.is_occupied());

    clock.advance(Duration::from_secs(5));
    assert_eq!(supervisor.run_once(), PassOutcome::ConstructionFailed);
}

// ─── Health checks ──────────────────────────────────────────────────

#[test]
fn dead_device_is_disconnected_and_rebuilt_after_the_interval() {
    let clock = ManualClock::shared();
    let slot = slot();
    let built = Arc::new(AtomicUsize::new(0));
    let mut supervisor =
        DeviceSupervisor::new(Arc::clone(&slot), counting_factory(&built), clock.clone(), config());

    assert_eq!(supervisor.run_once(), PassOutcome::Constructed);
    let first = slot.get().unwrap();
    first.alive.store(false, Ordering::SeqCst);

    clock.advance(Duration::from_millis(500));
    assert_eq!(supervisor.run_once(), PassOutcome::TornDown);
    assert_eq!(first.disconnects(), 1);
    assert!(slot.get().is_none());

    // Last construction attempt was 500 ms ago.
    assert_eq!(supervisor.run_once(), PassOutcome::Idle);
    clock.advance(Duration::from_millis(4_500));
    assert_eq!(supervisor.run_once(), PassOutcome::Constructed);

    let second = slot.get().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[test]
fn panicking_health_check_counts_as_dead() {
    let clock = ManualClock::shared();
    let slot = slot();
    let built = Arc::new(AtomicUsize::new(0));
    let mut supervisor =
        DeviceSupervisor::new(Arc::clone(&slot), counting_factory(&built), clock.clone(), config());

    supervisor.run_once();
    let device = slot.get().unwrap();
    device.panic_on_check.store(true, Ordering::SeqCst);

    clock.advance(Duration::from_millis(500));
    assert_eq!(supervisor.run_once(), PassOutcome::TornDown);
    assert_eq!(device.disconnects(), 1);
    assert!(!slot.is_occupied());
}

#[test]
fn healthy_checks_keep_the_slot_fresh() {
    let clock = ManualClock::shared();
    let slot = slot();
    let built = Arc::new(AtomicUsize::new(0));
    let mut supervisor =
        DeviceSupervisor::new(Arc::clone(&slot), counting_factory(&built), clock.clone(), config());
    let window = Duration::from_secs(1);

    supervisor.run_once();
    for _ in 0..10 {
        clock.advance(Duration::from_millis(500));
        assert_eq!(supervisor.run_once(), PassOutcome::Healthy);
        assert!(slot.health(clock.as_ref(), window).is_healthy());
    }
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_tears_down_the_published_device() {
    let clock = ManualClock::shared();
    let slot = slot();
    let built = Arc::new(AtomicUsize::new(0));
    let mut supervisor =
        DeviceSupervisor::new(Arc::clone(&slot), counting_factory(&built), clock.clone(), config());

    supervisor.run_once();
    let device = slot.get().unwrap();
    supervisor.shutdown();

    assert_eq!(device.disconnects(), 1);
    assert!(!slot.is_occupied());
}

// ─── Single owner ───────────────────────────────────────────────────

#[test]
fn racing_passes_publish_exactly_one_device() {
    let clock: Arc<dyn Clock> = clock::system();
    let slot = slot();
    let built = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(2));

    let passes: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let built = Arc::clone(&built);
            let factory: DeviceFactory<FakeDevice> = Box::new(move || {
                built.fetch_add(1, Ordering::SeqCst);
                // Keep construction running until the other pass reaches install_with.
                thread::sleep(Duration::from_millis(30));
                Ok(FakeDevice::new())
            });
            let mut supervisor =
                DeviceSupervisor::new(Arc::clone(&slot), factory, Arc::clone(&clock), config());
            thread::spawn(move || {
                barrier.wait();
                supervisor.run_once()
            })
        })
        .collect();

    let outcomes: Vec<PassOutcome> = passes.into_iter().map(|p| p.join().unwrap()).collect();

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == PassOutcome::Constructed)
            .count(),
        1
    );
    // The loser either found the slot filled under the construction lock, or only read
    // it after publication and health-checked the winner's device.
    assert!(outcomes.iter().all(|o| matches!(
        o,
        PassOutcome::Constructed | PassOutcome::AlreadyPresent | PassOutcome::Healthy
    )));
    assert!(slot.is_occupied());
}

// ─── Runner ─────────────────────────────────────────────────────────

#[test]
fn runner_keeps_a_device_published_and_replaces_dead_ones() {
    let lease = HostLease::new();
    let slot = slot();
    let built = Arc::new(AtomicUsize::new(0));
    let keep_alive = Arc::new(AtomicBool::new(true));
    let supervisor: Box<dyn Supervised> = Box::new(DeviceSupervisor::new(
        Arc::clone(&slot),
        counting_factory(&built),
        clock::system(),
        fast_config(),
    ));

    let mut runner = runner::spawn(
        vec![supervisor],
        lease.watch(),
        Arc::clone(&keep_alive),
        clock::system(),
        fast_config(),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(2), || slot.is_occupied()));
    let first = slot.get().unwrap();
    first.alive.store(false, Ordering::SeqCst);

    assert!(wait_until(Duration::from_secs(2), || {
        slot.get().is_some_and(|d| !Arc::ptr_eq(&d, &first))
    }));
    assert_eq!(first.disconnects(), 1);

    runner.stop();
    assert!(!runner.is_running());
    assert!(!slot.is_occupied());
}

#[test]
fn dropping_the_host_lease_stops_everything() {
    let lease = HostLease::new();
    let slot = slot();
    let built = Arc::new(AtomicUsize::new(0));
    let keep_alive = Arc::new(AtomicBool::new(true));
    let supervisor: Box<dyn Supervised> = Box::new(DeviceSupervisor::new(
        Arc::clone(&slot),
        counting_factory(&built),
        clock::system(),
        fast_config(),
    ));

    let mut runner = runner::spawn(
        vec![supervisor],
        lease.watch(),
        Arc::clone(&keep_alive),
        clock::system(),
        fast_config(),
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(2), || slot.is_occupied()));
    let device = slot.get().unwrap();

    drop(lease);
    assert!(wait_until(Duration::from_secs(2), || {
        !keep_alive.load(Ordering::SeqCst)
    }));

    runner.join();
    assert!(!slot.is_occupied());
    assert_eq!(device.disconnects(), 1);
}
