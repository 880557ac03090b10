//! Socket transport to the axis controller.
//!
//! `TcpTransport` turns a raw TCP stream into discrete request/response
//! exchanges. Every operation degrades to "no answer" (`None` / `false`)
//! rather than returning an error; the only externally visible failure is
//! [`Link::is_connected`] turning false.
//!
//! # Exchange ordering
//!
//! A single exchange lock serialises queries and pings. A query raises the
//! in-flight flag for its whole duration; a ping that observes the flag
//! (before or after taking the lock) is skipped, never queued behind the query.

use crate::framing::{self, FrameSpec};
use beamrig_common::clock::Clock;
use beamrig_common::config::TransportConfig;
use parking_lot::Mutex;
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Request/response channel the axis controller talks through.
///
/// Implemented by [`TcpTransport`]; tests substitute scripted links.
pub trait Link: Send + Sync {
    /// Open the connection if not already open. Returns the connected state.
    fn connect(&self) -> bool;

    /// Close the connection. Idempotent.
    fn disconnect(&self);

    /// Connection flag; performs no I/O and never waits on an exchange.
    fn is_connected(&self) -> bool;

    /// Send `text` and collect a reply of `expected_lines` lines, retrying
    /// up to `retries` times on no reply.
    fn send_query(&self, text: &str, newline: bool, expected_lines: usize, retries: u32)
    -> Option<String>;

    /// Keepalive exchange; skipped while a query is in flight. Returns
    /// `true` only when `expected_reply` came back verbatim.
    fn send_ping(&self, text: &str, newline: bool, expected_reply: &str, retries: u32) -> bool;

    /// Instant of the most recent non-empty reply.
    fn last_response(&self) -> Option<Instant>;

    /// Instant of the most recent successful ping.
    fn last_ping(&self) -> Option<Instant>;
}

/// TCP implementation of [`Link`].
pub struct TcpTransport {
    /// `host:port` as configured
    endpoint: String,
    /// Timeouts and pacing
    config: TransportConfig,
    /// Time source for timestamps and pacing
    clock: Arc<dyn Clock>,
    /// The one live socket, if any
    stream: Mutex<Option<TcpStream>>,
    /// Serialises whole exchanges (send + read)
    exchange: Mutex<()>,
    /// Raised for the duration of a query
    query_in_flight: AtomicBool,
    connected: AtomicBool,
    last_response: Mutex<Option<Instant>>,
    last_ping: Mutex<Option<Instant>>,
}

impl TcpTransport {
    /// Create an unconnected transport.
    pub fn new(endpoint: impl Into<String>, config: TransportConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            clock,
            stream: Mutex::new(None),
            exchange: Mutex::new(()),
            query_in_flight: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            last_response: Mutex::new(None),
            last_ping: Mutex::new(None),
        }
    }

    /// `true` while a query holds the exchange.
    pub fn query_in_flight(&self) -> bool {
        self.query_in_flight.load(Ordering::SeqCst)
    }

    fn resolve(&self) -> std::io::Result<SocketAddr> {
        self.endpoint
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "endpoint did not resolve"))
    }

    fn open(&self) -> std::io::Result<TcpStream> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout())?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Discard whatever is buffered on the socket so a stale reply cannot be
    /// attributed to the next command. The steady-state timeout is restored
    /// on every path.
    fn clean_input(&self, stream: &mut TcpStream) {
        let mut scratch = [0u8; 1024];
        let mut discarded = 0usize;
        loop {
            match framing::TimedRead::read_within(stream, &mut scratch, self.config.drain_timeout()) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if framing::is_timeout(&e) => break,
                Err(e) => {
                    error!("Error while draining input: {}", e);
                    break;
                }
            }
        }
        if discarded > 0 {
            debug!("Discarded {} stale bytes", discarded);
        }
        if let Err(e) = stream.set_read_timeout(Some(self.config.response_timeout())) {
            warn!("Failed to restore response timeout: {}", e);
        }
    }

    /// Drain input, then write `text` (plus `\n` if requested). A dead
    /// socket or a failed write disconnects immediately.
    pub fn send_message(&self, text: &str, newline: bool) -> bool {
        self.clock.sleep(self.config.pacing());

        let mut guard = self.stream.lock();
        let Some(stream) = guard.as_mut() else {
            return false;
        };
        if let Err(e) = stream.peer_addr() {
            error!("Connection lost before sending {:?}: {}", text, e);
            drop(guard);
            self.disconnect();
            return false;
        }

        self.clean_input(stream);

        let mut payload = text.to_string();
        if newline {
            payload.push('\n');
        }
        debug!("Sending message: {}", text);

        match stream.write_all(payload.as_bytes()).and_then(|_| stream.flush()) {
            Ok(()) => true,
            Err(e) => {
                error!("Connection lost, unable to send {:?}: {}", text, e);
                drop(guard);
                self.disconnect();
                false
            }
        }
    }

    /// Collect one reply. `None` covers silence, empty replies and I/O errors.
    ///
    /// A hard read error (reset, EOF before any byte) drops the stream, so
    /// the next `connect` opens a fresh one.
    pub fn read_message(&self, expected_lines: usize) -> Option<String> {
        let mut guard = self.stream.lock();
        let stream = guard.as_mut()?;

        let spec = FrameSpec::lines(
            expected_lines,
            self.config.response_timeout(),
            self.config.idle_timeout(),
        );

        match framing::read_frame(stream, &spec) {
            Ok(Some(reply)) => {
                debug!("Received response: {}", reply);
                self.touch_response();
                Some(reply)
            }
            Ok(None) => {
                warn!("Empty response received");
                None
            }
            Err(e) => {
                error!("Connection lost while receiving: {}", e);
                drop(guard);
                self.disconnect();
                None
            }
        }
    }

    fn touch_response(&self) {
        let now = self.clock.now();
        let mut last = self.last_response.lock();
        // Never let the liveness basis move backwards.
        if last.is_none_or(|prev| now > prev) {
            *last = Some(now);
        }
    }
}

impl Link for TcpTransport {
    fn connect(&self) -> bool {
        let mut guard = self.stream.lock();
        if guard.is_some() {
            return self.connected.load(Ordering::SeqCst);
        }

        info!("Trying to connect: {}", self.endpoint);
        match self.open() {
            Ok(stream) => {
                // Firmware is not ready to answer immediately after accept.
                self.clock.sleep(self.config.settle_delay());
                if let Err(e) = stream.set_read_timeout(Some(self.config.response_timeout())) {
                    warn!("Failed to set response timeout: {}", e);
                }
                *guard = Some(stream);
                self.connected.store(true, Ordering::SeqCst);
                info!("Connected to controller: {}", self.endpoint);
                true
            }
            Err(e) => {
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                error!("Connection error ({}): {}", self.endpoint, e);
                false
            }
        }
    }

    fn disconnect(&self) {
        let taken = self.stream.lock().take();
        self.connected.store(false, Ordering::SeqCst);
        if let Some(stream) = taken {
            let _ = stream.shutdown(Shutdown::Both);
            info!("Disconnected from {}", self.endpoint);
        }
    }

    /// Cleared by `disconnect` and by any failed read or write, so it never
    /// waits on an exchange in progress.
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_query(
        &self,
        text: &str,
        newline: bool,
        expected_lines: usize,
        retries: u32,
    ) -> Option<String> {
        let _exchange = self.exchange.lock();
        self.query_in_flight.store(true, Ordering::SeqCst);

        let mut reply = None;
        for attempt in 1..=retries.max(1) {
            if !self.send_message(text, newline) {
                trace!("Send of {:?} failed on attempt {}", text, attempt);
            }
            reply = self.read_message(expected_lines);
            if reply.is_some() {
                break;
            }
        }

        self.query_in_flight.store(false, Ordering::SeqCst);
        if reply.is_none() {
            error!("No reply to {:?} after {} attempts", text, retries.max(1));
        }
        reply
    }

    fn send_ping(&self, text: &str, newline: bool, expected_reply: &str, retries: u32) -> bool {
        if self.query_in_flight() {
            return false;
        }
        let _exchange = self.exchange.lock();

        for _ in 0..retries.max(1) {
            if self.query_in_flight() {
                return false;
            }
            self.send_message(text, newline);
            if self.read_message(1).as_deref() == Some(expected_reply) {
                *self.last_ping.lock() = Some(self.clock.now());
                return true;
            }
        }
        error!("No ping reply after {} attempts", retries.max(1));
        false
    }

    fn last_response(&self) -> Option<Instant> {
        *self.last_response.lock()
    }

    fn last_ping(&self) -> Option<Instant> {
        *self.last_ping.lock()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
