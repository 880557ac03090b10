//! Transport integration tests against the simulated controller.
//!
//! Real sockets on localhost: framing of single and multi-line replies,
//! sentinel stripping, failure degradation, and query/ping exclusion.

use beamrig_common::clock;
use beamrig_common::config::TransportConfig;
use beamrig_common::consts::FIRMWARE_ID;
use beamrig_hal::simulation::{self, LASER_INFO, SimulatorHandle, StageConfig};
use beamrig_hal::transport::{Link, TcpTransport};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Timeouts short enough for tests, long enough for loopback.
fn fast_transport() -> TransportConfig {
    TransportConfig {
        connect_timeout_ms: 500,
        response_timeout_ms: 500,
        idle_timeout_ms: 50,
        drain_timeout_ms: 5,
        settle_delay_ms: 0,
        pacing_ms: 0,
        retries: 3,
    }
}

fn connected(sim: &SimulatorHandle) -> TcpTransport {
    let transport = TcpTransport::new(sim.addr().to_string(), fast_transport(), clock::system());
    assert!(transport.connect(), "transport should connect to the simulator");
    transport
}

// ─── Tests ──────────────────────────────────────────────────────────

#[test]
fn query_returns_identification_and_stamps_response() {
    let sim = simulation::spawn_local(StageConfig::default()).unwrap();
    let transport = connected(&sim);
    assert!(transport.is_connected());
    assert!(transport.last_response().is_none());

    let reply = transport.send_query("ID?", true, 1, 3);
    assert_eq!(reply.as_deref(), Some(FIRMWARE_ID));
    assert!(transport.last_response().is_some());
}

#[test]
fn sentinel_noise_is_stripped() {
    let sim = simulation::spawn_local(StageConfig {
        noise: true,
        ..StageConfig::default()
    })
    .unwrap();
    let transport = connected(&sim);

    assert_eq!(transport.send_query("ID?", true, 1, 3).as_deref(), Some(FIRMWARE_ID));
    assert_eq!(transport.send_query("P0?", true, 1, 3).as_deref(), Some("-1"));
}

#[test]
fn multi_line_reply_is_collected_whole() {
    let sim = simulation::spawn_local(StageConfig::default()).unwrap();
    let transport = connected(&sim);

    let reply = transport.send_query("LCr i", true, 5, 3).unwrap();
    assert_eq!(reply, LASER_INFO);
}

#[test]
fn connect_to_closed_port_degrades_to_no_answer() {
    // Bind then drop to get a port nobody listens on.
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let transport = TcpTransport::new(format!("127.0.0.1:{port}"), fast_transport(), clock::system());

    assert!(!transport.connect());
    assert!(!transport.is_connected());
    assert_eq!(transport.send_query("ID?", true, 1, 2), None);
    assert!(!transport.send_ping("ID?", true, FIRMWARE_ID, 1));
}

#[test]
fn muted_controller_yields_none_after_retries() {
    let sim = simulation::spawn_local(StageConfig::default()).unwrap();
    let transport = connected(&sim);
    sim.set_muted(true);

    assert_eq!(transport.send_query("ID?", true, 1, 2), None);
    assert!(transport.is_connected());

    sim.set_muted(false);
    assert_eq!(transport.send_query("ID?", true, 1, 2).as_deref(), Some(FIRMWARE_ID));
}

#[test]
fn dropped_connection_yields_none_and_reconnect_recovers() {
    let sim = simulation::spawn_local(StageConfig::default()).unwrap();
    let transport = connected(&sim);
    sim.drop_connections();
    thread::sleep(Duration::from_millis(100));

    assert_eq!(transport.send_query("ID?", true, 1, 3), None);
    // The dead stream is dropped by the failed exchange itself.
    assert!(!transport.is_connected());

    assert!(transport.connect());
    assert_eq!(transport.send_query("ID?", true, 1, 3).as_deref(), Some(FIRMWARE_ID));
    assert_eq!(sim.accepted_connections(), 2);
}

#[test]
fn is_connected_answers_while_a_query_waits() {
    let sim = simulation::spawn_local(StageConfig::default()).unwrap();
    let transport = Arc::new(connected(&sim));
    sim.set_muted(true);

    let query = {
        let transport = Arc::clone(&transport);
        thread::spawn(move || transport.send_query("ID?", true, 1, 2))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(transport.query_in_flight());

    let started = Instant::now();
    assert!(transport.is_connected());
    assert!(started.elapsed() < Duration::from_millis(100));

    assert_eq!(query.join().unwrap(), None);
    assert!(transport.is_connected());
}

#[test]
fn ping_updates_last_ping_only_on_exact_reply() {
    let sim = simulation::spawn_local(StageConfig::default()).unwrap();
    let transport = connected(&sim);

    assert!(!transport.send_ping("ID?", true, "something else", 1));
    assert!(transport.last_ping().is_none());

    assert!(transport.send_ping("ID?", true, FIRMWARE_ID, 1));
    assert!(transport.last_ping().is_some());
}

#[test]
fn concurrent_pings_never_interleave_with_queries() {
    let sim = simulation::spawn_local(StageConfig::default()).unwrap();
    let transport = Arc::new(connected(&sim));

    let pinger = {
        let transport = Arc::clone(&transport);
        thread::spawn(move || {
            let mut answered = 0;
            for _ in 0..100 {
                if transport.send_ping("ID?", true, FIRMWARE_ID, 1) {
                    answered += 1;
                }
            }
            answered
        })
    };

    for _ in 0..100 {
        // Every query reply must be its own; a ping reply here would be an interleave.
        assert_eq!(transport.send_query("P3?", true, 1, 3).as_deref(), Some("-1"));
    }

    let answered = pinger.join().unwrap();
    assert!(answered <= 100);
    assert!(!transport.query_in_flight());
}
