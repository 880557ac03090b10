//! TCP front end for [`SimulatedController`].
//!
//! One accept thread plus one thread per client connection. All clients share
//! the same controller state, like the real firmware.

use super::stage::{SimulatedController, StageConfig};
use beamrig_common::consts::{LINE_DELIMITER, SENTINEL_BYTE};
use parking_lot::Mutex;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll period of the accept and client loops.
const LOOP_PERIOD: Duration = Duration::from_millis(20);

/// State shared between the handle and the server threads.
struct Shared {
    controller: Mutex<SimulatedController>,
    running: AtomicBool,
    /// Bumped to make every open connection close
    drop_generation: AtomicU64,
    /// While set, commands are read but never answered
    muted: AtomicBool,
    connections: AtomicUsize,
    /// Total connections accepted since start
    accepted: AtomicUsize,
}

/// Running simulated controller. Dropping it stops the server.
pub struct SimulatorHandle {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

/// Bind `bind` (use port 0 for an ephemeral port) and start serving.
pub fn spawn(bind: &str, config: StageConfig) -> io::Result<SimulatorHandle> {
    let listener = TcpListener::bind(bind)?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    let shared = Arc::new(Shared {
        controller: Mutex::new(SimulatedController::new(config)),
        running: AtomicBool::new(true),
        drop_generation: AtomicU64::new(0),
        muted: AtomicBool::new(false),
        connections: AtomicUsize::new(0),
        accepted: AtomicUsize::new(0),
    });

    let acceptor = {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("sim-accept".into())
            .spawn(move || accept_loop(listener, shared))?
    };

    info!("Simulated controller listening on {}", addr);
    Ok(SimulatorHandle {
        addr,
        shared,
        acceptor: Some(acceptor),
    })
}

impl SimulatorHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Run `f` against the controller state.
    pub fn with_controller<T>(&self, f: impl FnOnce(&mut SimulatedController) -> T) -> T {
        f(&mut *self.shared.controller.lock())
    }

    /// Close every open client connection.
    pub fn drop_connections(&self) {
        self.shared.drop_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop answering (connections stay open).
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::SeqCst);
    }

    pub fn open_connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn accepted_connections(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop accepting, close clients and join the accept thread.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("Simulator accept thread panicked");
            }
            info!("Simulated controller on {} stopped", self.addr);
        }
    }
}

impl Drop for SimulatorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut clients: Vec<JoinHandle<()>> = Vec::new();

    while shared.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("sim: client {} connected", peer);
                shared.accepted.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("sim-client-{}", peer.port()))
                    .spawn(move || serve_client(stream, shared));
                match spawned {
                    Ok(handle) => clients.push(handle),
                    Err(e) => warn!("sim: failed to spawn client thread: {}", e),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(LOOP_PERIOD),
            Err(e) => {
                warn!("sim: accept failed: {}", e);
                thread::sleep(LOOP_PERIOD);
            }
        }
        clients.retain(|c| !c.is_finished());
    }

    for client in clients {
        let _ = client.join();
    }
}

fn serve_client(mut stream: TcpStream, shared: Arc<Shared>) {
    shared.connections.fetch_add(1, Ordering::SeqCst);
    let generation = shared.drop_generation.load(Ordering::SeqCst);

    if let Err(e) = client_loop(&mut stream, &shared, generation) {
        debug!("sim: client closed: {}", e);
    }

    let _ = stream.shutdown(Shutdown::Both);
    shared.connections.fetch_sub(1, Ordering::SeqCst);
}

fn client_loop(stream: &mut TcpStream, shared: &Shared, generation: u64) -> io::Result<()> {
    // Some platforms hand out accepted sockets in the listener's nonblocking mode.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(LOOP_PERIOD))?;
    stream.set_nodelay(true)?;

    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 512];

    loop {
        if !shared.running.load(Ordering::SeqCst)
            || shared.drop_generation.load(Ordering::SeqCst) != generation
        {
            return Ok(());
        }

        match stream.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        while let Some(end) = pending.iter().position(|b| *b == LINE_DELIMITER) {
            let line: Vec<u8> = pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() || shared.muted.load(Ordering::SeqCst) {
                continue;
            }

            let (reply, noise) = {
                let mut controller = shared.controller.lock();
                (controller.respond(&text), controller.config().noise)
            };

            let mut wire = Vec::with_capacity(reply.len() + 2);
            if noise {
                wire.push(SENTINEL_BYTE);
            }
            wire.extend_from_slice(reply.as_bytes());
            wire.push(LINE_DELIMITER);
            stream.write_all(&wire)?;
        }
    }
}
