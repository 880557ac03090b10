//! # Axis Service Tests
//!
//! The full device layer (context, runner, supervisor, registry) against the
//! simulated controller over localhost sockets.

use beamrig::{AppContext, AxisService, HostLease, ServiceError};
use beamrig_common::clock::{self, ManualClock};
use beamrig_common::config::RigConfig;
use beamrig_common::device::{DeviceError, DeviceFactory};
use beamrig_common::watchdog::{DeviceKind, HealthStatus, WatchdogError};
use beamrig_hal::poll::StopSignal;
use beamrig_hal::simulation::{self, HomingState, SimulatorHandle, StageConfig};
use beamrig_hal::{AxisController, AxisError, Calibration};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ─── Helpers ────────────────────────────────────────────────────────

fn fast_config(port: u16) -> RigConfig {
    let mut config = RigConfig::new("127.0.0.1", port, 100);
    config.transport.settle_delay_ms = 0;
    config.transport.pacing_ms = 0;
    config.transport.connect_timeout_ms = 200;
    config.transport.response_timeout_ms = 200;
    config.transport.idle_timeout_ms = 50;
    config.transport.drain_timeout_ms = 5;
    config.transport.retries = 1;
    config.axis.handshake_interval_ms = 10;
    config.axis.handshake_timeout_ms = 1_000;
    config.axis.busy_poll_ms = 5;
    config.axis.home_poll_ms = 5;
    config.axis.position_poll_ms = 1;
    config.axis.home_settle_ms = 5;
    config.axis.liveness_window_ms = 400;
    config.axis.ping_interval_ms = 100;
    config.axis.ping_quiet_ms = 50;
    config.axis.calibration_poll_ms = 5;
    config.axis.calibration_settle_margin_ms = 10;
    config.supervisor.reconnect_interval_ms = 50;
    config.supervisor.health_check_interval_ms = 20;
    config.supervisor.tick_ms = 5;
    config.supervisor.host_check_interval_ms = 20;
    config.supervisor.watchdog_tick_ms = 5;
    config.validate().unwrap();
    config
}

fn stage() -> StageConfig {
    StageConfig {
        home_busy_polls: 2,
        step_per_query: 500,
        travel_limit: 100_000,
        noise: false,
    }
}

/// Simulator, lease and a service wired to it.
fn rig(sim: &SimulatorHandle) -> (AxisService, HostLease) {
    let lease = HostLease::new();
    let context = AppContext::new(fast_config(sim.port()), clock::system(), lease.watch());
    (AxisService::new(Arc::new(context)), lease)
}

fn closed_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// ─── Connect ────────────────────────────────────────────────────────

#[test]
fn commands_before_connect_report_not_connected() {
    let sim = simulation::spawn_local(stage()).unwrap();
    let (service, _lease) = rig(&sim);

    assert!(matches!(service.home(0), Err(ServiceError::NotConnected)));
    assert!(matches!(service.go_to(0, 10, false), Err(ServiceError::NotConnected)));
    assert!(matches!(service.stop_all(), Err(ServiceError::NotConnected)));
    assert!(matches!(
        service.initialize_axis(0),
        Err(ServiceError::NotConnected)
    ));
    assert!(!service.is_alive());
    assert!(!service.context().devices_started());
}

#[test]
fn connect_acquires_a_live_controller() {
    let sim = simulation::spawn_local(stage()).unwrap();
    let (service, _lease) = rig(&sim);

    let controller = service.connect(Duration::from_secs(5)).unwrap();
    assert!(controller.is_device_alive());
    assert!(service.is_alive());
    assert!(
        service
            .context()
            .health(DeviceKind::AxisController)
            .is_healthy()
    );

    // A second connect reuses the running device layer.
    let again = service.connect(Duration::from_secs(5)).unwrap();
    assert!(Arc::ptr_eq(&controller, &again));
    assert_eq!(sim.accepted_connections(), 1);
}

#[test]
fn connect_times_out_when_nothing_answers() {
    let lease = HostLease::new();
    let context = AppContext::new(fast_config(closed_port()), clock::system(), lease.watch());
    let service = AxisService::new(Arc::new(context));

    let err = service.connect(Duration::from_millis(300)).unwrap_err();
    assert!(matches!(err, ServiceError::Unavailable { .. }));
    assert_eq!(
        service.context().health(DeviceKind::AxisController),
        HealthStatus::Absent
    );
}

#[test]
fn invalid_configuration_is_a_start_failure() {
    let lease = HostLease::new();
    let mut config = fast_config(5000);
    config.controller.host.clear();
    let service = AxisService::new(Arc::new(AppContext::new(
        config,
        clock::system(),
        lease.watch(),
    )));

    let err = service.connect(Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, ServiceError::Start(WatchdogError::Config(_))));
    assert!(!service.context().devices_started());
}

#[test]
fn wait_for_controller_uses_the_injected_clock() {
    // Nothing ever gets published: the factory is never run because the
    // device layer is not started.
    let lease = HostLease::new();
    let clock = ManualClock::shared();
    let factory: DeviceFactory<AxisController> =
        Box::new(|| Err(DeviceError::ConnectFailed("unused".into())));
    let context = AppContext::with_axis_factory(fast_config(5000), clock.clone(), lease.watch(), factory);
    let service = AxisService::new(Arc::new(context));

    let found = service.wait_for_axis_controller(Duration::from_secs(10), Duration::from_millis(250));
    assert!(found.is_none());
    assert!(clock.elapsed() >= Duration::from_secs(10));
    assert!(clock.elapsed() < Duration::from_secs(11));
}

#[test]
fn slow_construction_does_not_block_consumers() {
    let lease = HostLease::new();
    let factory: DeviceFactory<AxisController> = Box::new(|| {
        thread::sleep(Duration::from_millis(1_500));
        Err(DeviceError::ConnectFailed("slow and refused".into()))
    });
    let context = AppContext::with_axis_factory(fast_config(5000), clock::system(), lease.watch(), factory);
    let service = AxisService::new(Arc::new(context));
    service.context().start_devices().unwrap();
    // Let the supervisor enter the factory.
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    assert!(
        service
            .wait_for_axis_controller(Duration::from_millis(100), Duration::from_millis(10))
            .is_none()
    );
    assert!(matches!(service.home(0), Err(ServiceError::NotConnected)));
    assert!(!service.is_alive());
    assert_eq!(
        service.context().health(DeviceKind::AxisController),
        HealthStatus::Absent
    );
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn context_wait_reports_ready_timeout_and_cancellation() {
    let lease = HostLease::new();
    let clock = ManualClock::shared();
    let factory: DeviceFactory<AxisController> =
        Box::new(|| Err(DeviceError::ConnectFailed("unused".into())));
    let context = AppContext::with_axis_factory(fast_config(5000), clock.clone(), lease.watch(), factory);
    let stop = StopSignal::new();

    let err = context
        .wait_for_axis(stop.token(), Duration::from_secs(2), Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(
        err,
        WatchdogError::ReadyTimeout {
            kind: DeviceKind::AxisController,
            ..
        }
    ));

    let token = stop.token();
    stop.raise();
    let err = context
        .wait_for_axis(token, Duration::from_secs(2), Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, WatchdogError::Other(_)));

    context.shutdown();
    let err = context
        .wait_for_axis(stop.token(), Duration::from_secs(2), Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, WatchdogError::Other(ref reason) if reason.contains("stopped")));
}

// ─── Motion through the service ─────────────────────────────────────

#[test]
fn go_to_homes_then_moves() {
    let sim = simulation::spawn_local(stage()).unwrap();
    let (service, _lease) = rig(&sim);
    service.connect(Duration::from_secs(5)).unwrap();

    service.go_to(0, 1_500, true).unwrap();

    assert_eq!(service.position(0).unwrap(), 1_500);
    sim.with_controller(|c| {
        assert_eq!(c.axis(0).unwrap().state(), HomingState::Referenced);
    });

    service.home(0).unwrap();
    assert_eq!(service.position(0).unwrap(), 0);
}

#[test]
fn controller_rejection_is_an_axis_error() {
    let sim = simulation::spawn_local(stage()).unwrap();
    let (service, _lease) = rig(&sim);
    service.connect(Duration::from_secs(5)).unwrap();

    let err = service.home(9).unwrap_err();
    assert!(matches!(err, ServiceError::Axis(AxisError::Protocol(_))));
}

#[test]
fn initialize_axis_reports_the_travel_range() {
    let sim = simulation::spawn_local(StageConfig {
        step_per_query: 2_500,
        travel_limit: 10_000,
        ..stage()
    })
    .unwrap();
    let (service, _lease) = rig(&sim);
    service.connect(Duration::from_secs(5)).unwrap();

    let calibration = service.initialize_axis(0).unwrap();
    assert!(matches!(
        calibration,
        Calibration::Complete {
            travel_range_units: 95,
            ..
        }
    ));
}

// ─── Supervision ────────────────────────────────────────────────────

#[test]
fn dropped_controller_is_reconnected_by_the_supervisor() {
    let sim = simulation::spawn_local(stage()).unwrap();
    let (service, _lease) = rig(&sim);
    let first = service.connect(Duration::from_secs(5)).unwrap();

    sim.drop_connections();

    assert!(wait_until(Duration::from_secs(5), || {
        service
            .controller()
            .is_ok_and(|c| !Arc::ptr_eq(&c, &first) && c.is_device_alive())
    }));
    assert!(sim.accepted_connections() >= 2);
    assert!(service.position(0).is_ok());
}

#[test]
fn shutdown_clears_the_registry_and_refuses_restart() {
    let sim = simulation::spawn_local(stage()).unwrap();
    let (service, _lease) = rig(&sim);
    service.connect(Duration::from_secs(5)).unwrap();

    service.context().shutdown();

    assert!(!service.context().is_running());
    assert!(matches!(service.home(0), Err(ServiceError::NotConnected)));
    assert!(matches!(
        service.connect(Duration::from_millis(100)),
        Err(ServiceError::Start(_))
    ));
    assert!(wait_until(Duration::from_secs(2), || sim.open_connections() == 0));
}

#[test]
fn dropping_the_host_lease_tears_the_device_layer_down() {
    let sim = simulation::spawn_local(stage()).unwrap();
    let (service, lease) = rig(&sim);
    service.connect(Duration::from_secs(5)).unwrap();

    drop(lease);

    assert!(wait_until(Duration::from_secs(2), || {
        !service.context().is_running() && service.controller().is_err()
    }));
}
