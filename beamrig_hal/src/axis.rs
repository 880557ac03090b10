//! # Axis Controller
//!
//! Motion state machine on top of a [`Link`]:
//!
//! ```text
//! Disconnected ──connect()──► Handshaking ──ID? == firmware──► Ready
//!       ▲                                                        │
//!       └──────────────────────── disconnect() ◄─────────────────┘
//! ```
//!
//! Homing, moving and calibration are blocking procedures run from `Ready`,
//! each bounded by the [`poll`](crate::poll) helper. A `BUSY` reply is a
//! state to wait out, never an error. `Error_<n>` tokens are logged and kept
//! in [`AxisController::last_fault`]; they only fail an operation when the
//! explicit `OK` check after them fails.

use crate::error::AxisError;
use crate::poll::{self, PollPolicy, Step, StopSignal, StopToken};
use crate::protocol::{self, Command, ControllerFault, Reply};
use crate::transport::{Link, TcpTransport};
use beamrig_common::clock::Clock;
use beamrig_common::config::{AxisConfig, RigConfig};
use beamrig_common::consts::{FIRMWARE_ID, LIMIT_SWITCH_BACKOFF, NOT_REFERENCED};
use beamrig_common::device::{Device, DeviceError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connection state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    /// Socket open, firmware signature not yet seen.
    Handshaking,
    Ready,
}

/// Everything the controller needs from [`RigConfig`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub axis: AxisConfig,
    /// Steps per millimetre, used by the unit helpers and calibration.
    pub steps_per_unit: u32,
    /// Transport retries per query.
    pub retries: u32,
}

impl ControllerSettings {
    pub fn from_rig(config: &RigConfig) -> Self {
        Self {
            axis: config.axis.clone(),
            steps_per_unit: config.controller.steps_per_unit,
            retries: config.transport.retries,
        }
    }
}

/// Result of [`AxisController::initialize_axis`].
#[derive(Debug, Clone, PartialEq)]
pub enum Calibration {
    /// All steps ran.
    Complete {
        steps_per_unit: u32,
        /// Position after backing off the far limit switch.
        position: i64,
        /// Usable travel in whole millimetres.
        travel_range_units: i64,
    },
    /// A step failed; the routine stopped there.
    Partial {
        last_position: Option<i64>,
        error: AxisError,
    },
}

/// Client for the six-axis stage controller.
pub struct AxisController {
    link: Box<dyn Link>,
    clock: Arc<dyn Clock>,
    settings: ControllerSettings,
    state: Mutex<ControllerState>,
    stop: StopSignal,
    last_fault: Mutex<Option<ControllerFault>>,
}

impl std::fmt::Debug for AxisController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxisController")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}

impl AxisController {
    /// Wrap an unconnected link.
    pub fn new(link: Box<dyn Link>, clock: Arc<dyn Clock>, settings: ControllerSettings) -> Self {
        Self {
            link,
            clock,
            settings,
            state: Mutex::new(ControllerState::Disconnected),
            stop: StopSignal::new(),
            last_fault: Mutex::new(None),
        }
    }

    /// Controller over a fresh TCP transport to `config.controller`.
    pub fn over_tcp(config: &RigConfig, clock: Arc<dyn Clock>) -> Self {
        let transport = TcpTransport::new(
            config.controller.endpoint(),
            config.transport.clone(),
            Arc::clone(&clock),
        );
        Self::new(Box::new(transport), clock, ControllerSettings::from_rig(config))
    }

    /// Build over TCP and run the handshake.
    pub fn connect_tcp(config: &RigConfig, clock: Arc<dyn Clock>) -> Result<Self, AxisError> {
        let controller = Self::over_tcp(config, clock);
        controller.connect()?;
        Ok(controller)
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Most recent `Error_<n>` seen in any reply.
    pub fn last_fault(&self) -> Option<ControllerFault> {
        self.last_fault.lock().clone()
    }

    fn config(&self) -> &AxisConfig {
        &self.settings.axis
    }

    // ─── Connection / health ────────────────────────────────────────

    /// Open the link and repeat `ID?` until the firmware signature comes back.
    ///
    /// Bounded by `axis.handshake_timeout_ms` (0 retries forever).
    pub fn connect(&self) -> Result<(), AxisError> {
        if !self.link.connect() {
            *self.state.lock() = ControllerState::Disconnected;
            return Err(AxisError::NotConnected);
        }
        *self.state.lock() = ControllerState::Handshaking;

        let stop = self.stop.token();
        let policy = PollPolicy {
            interval: self.config().handshake_interval(),
            timeout: self.config().handshake_timeout(),
        };
        let outcome = self.wait(
            stop,
            policy,
            || {
                if !self.link.is_connected() {
                    return Err(AxisError::NotConnected);
                }
                Ok(match self.identify() {
                    Some(_) => Step::Done(()),
                    None => Step::Pending,
                })
            },
            |waited| AxisError::HandshakeTimeout { waited },
        );

        match outcome {
            Ok(()) => {
                *self.state.lock() = ControllerState::Ready;
                info!("AxisController successfully detected");
                Ok(())
            }
            Err(e) => {
                error!("Axis controller handshake failed: {}", e);
                self.disconnect_link();
                Err(e)
            }
        }
    }

    fn disconnect_link(&self) {
        self.link.disconnect();
        *self.state.lock() = ControllerState::Disconnected;
    }

    /// `ID?` once; `Some` only for the exact firmware signature.
    pub fn identify(&self) -> Option<String> {
        let reply = self.command(&Command::Identify);
        protocol::is_identification(reply.as_deref()).then(|| FIRMWARE_ID.to_string())
    }

    /// Liveness verdict: time since the last reply is inside the window.
    ///
    /// May send a throttled keepalive first, but the verdict never depends
    /// on that ping; any recent reply counts.
    pub fn is_device_alive(&self) -> bool {
        if !self.link.is_connected() {
            return false;
        }
        self.ping_if_due();
        self.link
            .last_response()
            .is_some_and(|at| self.clock.since(at) < self.config().liveness_window())
    }

    fn ping_if_due(&self) {
        let due = match self.link.last_ping() {
            None => true,
            Some(pinged) => {
                self.clock.since(pinged) > self.config().ping_interval()
                    && self
                        .link
                        .last_response()
                        .is_none_or(|at| self.clock.since(at) > self.config().ping_quiet())
            }
        };
        if due {
            let answered = self.link.send_ping(
                &Command::Identify.wire(),
                true,
                FIRMWARE_ID,
                self.settings.retries,
            );
            debug!("Keepalive ping answered: {}", answered);
        }
    }

    // ─── Low-level exchange ─────────────────────────────────────────

    /// Send a command and return whatever came back, recording any fault.
    pub fn command(&self, command: &Command) -> Option<String> {
        let reply = self.link.send_query(
            &command.wire(),
            true,
            command.expected_lines(),
            self.settings.retries,
        );
        if let Some(text) = reply.as_deref() {
            self.note_fault(text);
        }
        reply
    }

    /// Like [`command`](Self::command), but a missing reply is an error.
    fn exchange(&self, command: &Command) -> Result<String, AxisError> {
        if !self.link.is_connected() {
            return Err(AxisError::NotConnected);
        }
        self.command(command)
            .ok_or(AxisError::Protocol(protocol::ProtocolError::NoReply))
    }

    fn note_fault(&self, reply: &str) -> Option<ControllerFault> {
        let fault = protocol::find_fault(reply)?;
        warn!("{}: {:?}", fault.kind.describe(), reply);
        *self.last_fault.lock() = Some(fault.clone());
        Some(fault)
    }

    fn escalate_fault(&self, reply: &str) {
        if let Some(fault) = protocol::find_fault(reply) {
            *self.last_fault.lock() = Some(fault.escalate());
        }
    }

    /// Require `OK`; a fault in the same reply becomes fatal.
    fn require_ok(&self, reply: &str) -> Result<(), AxisError> {
        protocol::expect_ok(Some(reply)).map_err(|e| {
            self.escalate_fault(reply);
            AxisError::from(e)
        })
    }

    fn wait<T>(
        &self,
        stop: StopToken<'_>,
        policy: PollPolicy,
        attempt: impl FnMut() -> Result<Step<T>, AxisError>,
        on_timeout: impl FnOnce(Duration) -> AxisError,
    ) -> Result<T, AxisError> {
        poll::poll(self.clock.as_ref(), stop, policy, attempt, on_timeout)
    }

    /// Sleep `total` in poll-sized slices, honouring stop requests.
    fn pause(&self, total: Duration, stop: StopToken<'_>) -> Result<(), AxisError> {
        let slice = self.config().calibration_poll().max(Duration::from_millis(1));
        let started = self.clock.now();
        loop {
            stop.check()?;
            let waited = self.clock.since(started);
            if waited >= total {
                return Ok(());
            }
            self.clock.sleep(slice.min(total - waited));
        }
    }

    // ─── Position / motion ──────────────────────────────────────────

    /// Current step position of `axis`, waiting out `BUSY`.
    pub fn get_position(&self, axis: u8) -> Result<i64, AxisError> {
        self.read_position(axis, self.stop.token())
    }

    fn read_position(&self, axis: u8, stop: StopToken<'_>) -> Result<i64, AxisError> {
        let command = Command::GetPosition { axis };
        self.wait(
            stop,
            PollPolicy::bounded(self.config().busy_poll(), self.config().position_timeout()),
            || {
                let reply = self.exchange(&command)?;
                match Reply::parse(&reply) {
                    Reply::Busy => Ok(Step::Pending),
                    Reply::Position(position) => Ok(Step::Done(position)),
                    _ => {
                        self.escalate_fault(&reply);
                        Err(protocol::ProtocolError::MalformedPosition { reply }.into())
                    }
                }
            },
            |waited| AxisError::BusyTimeout {
                operation: "position",
                waited,
            },
        )
    }

    /// `true` when `axis` reports the unreferenced sentinel or cannot be read.
    pub fn needs_initialize(&self, axis: u8) -> bool {
        self.check_needs_initialize(axis, self.stop.token())
            .unwrap_or(true)
    }

    fn check_needs_initialize(&self, axis: u8, stop: StopToken<'_>) -> Result<bool, AxisError> {
        match self.read_position(axis, stop) {
            Ok(position) => Ok(position == NOT_REFERENCED),
            Err(AxisError::Aborted) => Err(AxisError::Aborted),
            Err(e) => {
                warn!("Error checking axis {} position: {}", axis, e);
                Ok(true)
            }
        }
    }

    /// Run the homing cycle, re-issuing `H<axis>` while the controller is `BUSY`.
    pub fn home(&self, axis: u8) -> Result<(), AxisError> {
        self.home_with(axis, self.stop.token())
    }

    fn home_with(&self, axis: u8, stop: StopToken<'_>) -> Result<(), AxisError> {
        info!("Homing axis {}", axis);
        self.accept(&Command::Home { axis }, "HOME", stop)
    }

    /// Send a motion command until it is accepted with `OK`.
    fn accept(
        &self,
        command: &Command,
        operation: &'static str,
        stop: StopToken<'_>,
    ) -> Result<(), AxisError> {
        self.wait(
            stop,
            PollPolicy::bounded(self.config().home_poll(), self.config().home_timeout()),
            || {
                let reply = self.exchange(command)?;
                debug!("{} first line: {:?}", operation, protocol::first_line(&reply));
                if protocol::is_busy(&reply) {
                    return Ok(Step::Pending);
                }
                self.require_ok(&reply)?;
                Ok(Step::Done(()))
            },
            |waited| AxisError::BusyTimeout { operation, waited },
        )
    }

    /// Move `axis` to `target` steps.
    ///
    /// An unreferenced axis is homed first and must then read exactly 0.
    /// With `wait`, blocks until the position equals `target`, failing with
    /// [`AxisError::Stalled`] once the same position has repeated
    /// `axis.stall_repeats` times in a row.
    pub fn go_to_position(&self, axis: u8, target: i64, wait: bool) -> Result<(), AxisError> {
        self.go_to_with(axis, target, wait, self.stop.token())
    }

    fn go_to_with(
        &self,
        axis: u8,
        target: i64,
        wait: bool,
        stop: StopToken<'_>,
    ) -> Result<(), AxisError> {
        if self.check_needs_initialize(axis, stop)? {
            info!("Axis {} is not referenced, homing before the move", axis);
            self.home_with(axis, stop)?;
            self.pause(self.config().home_settle(), stop)?;
            let position = self.read_position(axis, stop)?;
            if position != 0 {
                return Err(AxisError::NotHomed { axis, position });
            }
        }

        debug!("Moving axis {} to {}", axis, target);
        self.accept(&Command::MoveTo { axis, target }, "MOVE", stop)?;

        if wait {
            self.wait_in_position(axis, target, stop)?;
        }
        Ok(())
    }

    fn wait_in_position(&self, axis: u8, target: i64, stop: StopToken<'_>) -> Result<(), AxisError> {
        let stall_repeats = self.config().stall_repeats;
        let mut last: Option<i64> = None;
        let mut repeats = 0u32;

        self.wait(
            stop,
            PollPolicy::bounded(self.config().position_poll(), self.config().move_timeout()),
            || {
                let position = self.read_position(axis, stop)?;
                if position == target {
                    return Ok(Step::Done(()));
                }
                if last == Some(position) {
                    repeats += 1;
                    if repeats >= stall_repeats {
                        return Err(AxisError::Stalled {
                            axis,
                            position,
                            repeats,
                        });
                    }
                } else {
                    repeats = 0;
                }
                last = Some(position);
                Ok(Step::Pending)
            },
            |waited| AxisError::MoveTimeout {
                axis,
                target,
                waited,
            },
        )?;

        info!("Axis {} in position {}", axis, target);
        Ok(())
    }

    /// Abort every in-progress wait, then send the configured stop command.
    pub fn stop_all(&self) -> Result<(), AxisError> {
        self.stop.raise();
        let Some(text) = self.config().stop_command.clone() else {
            info!("Stop requested: waits aborted, no stop command configured");
            return Ok(());
        };
        info!("Stop requested: sending {:?}", text);
        let reply = self.exchange(&Command::Raw(text))?;
        self.require_ok(&reply)
    }

    // ─── Units ──────────────────────────────────────────────────────

    pub fn position_in_units(&self, axis: u8) -> Result<f64, AxisError> {
        let steps = self.get_position(axis)?;
        Ok(steps as f64 / f64::from(self.settings.steps_per_unit))
    }

    /// Millimetres to the nearest whole step.
    pub fn steps_from_units(&self, value: f64) -> i64 {
        (value * f64::from(self.settings.steps_per_unit)).round() as i64
    }

    /// Move (without waiting) to a position given in millimetres.
    pub fn move_by_units(&self, axis: u8, value: f64) -> Result<(), AxisError> {
        self.go_to_position(axis, self.steps_from_units(value), false)
    }

    // ─── Calibration ────────────────────────────────────────────────

    /// Find the usable travel of `axis` by running into the far limit.
    ///
    /// Never fails: an error at any step yields [`Calibration::Partial`].
    pub fn initialize_axis(&self, axis: u8) -> Calibration {
        let mut last_position = None;
        match self.run_calibration(axis, self.stop.token(), &mut last_position) {
            Ok(done) => done,
            Err(error) => {
                error!("Axis {} calibration failed: {}", axis, error);
                Calibration::Partial {
                    last_position,
                    error,
                }
            }
        }
    }

    fn run_calibration(
        &self,
        axis: u8,
        stop: StopToken<'_>,
        last_position: &mut Option<i64>,
    ) -> Result<Calibration, AxisError> {
        let cfg = self.config();
        self.home_with(axis, stop)?;

        let started = self.clock.now();
        self.go_to_with(axis, cfg.calibration_target, false, stop)?;
        let run_time = self.clock.since(started);

        let mut previous = self.read_position(axis, stop)?;
        *last_position = Some(previous);

        let limit = self.wait(
            stop,
            PollPolicy::bounded(cfg.calibration_poll(), cfg.move_timeout()),
            || {
                let position = self.read_position(axis, stop)?;
                *last_position = Some(position);
                if position == previous {
                    return Ok(Step::Done(position));
                }
                previous = position;
                Ok(Step::Pending)
            },
            |waited| AxisError::MoveTimeout {
                axis,
                target: cfg.calibration_target,
                waited,
            },
        )?;
        info!("Axis {} stopped at limit {}", axis, limit);

        let backoff = limit.div_euclid(1000) * 1000 - LIMIT_SWITCH_BACKOFF;
        self.go_to_with(axis, backoff, true, stop)?;
        self.pause(cfg.calibration_poll(), stop)?;

        let position = self.read_position(axis, stop)?;
        *last_position = Some(position);
        let steps_per_unit = self.settings.steps_per_unit;
        let travel_range_units = position / i64::from(steps_per_unit);
        info!(
            "Axis {} travel range: {} mm ({} steps)",
            axis, travel_range_units, position
        );

        self.home_with(axis, stop)?;
        let settle = Duration::from_secs(run_time.as_secs()) + cfg.calibration_settle_margin();
        debug!("Waiting {:?} for the firmware to settle", settle);
        self.pause(settle, stop)?;

        Ok(Calibration::Complete {
            steps_per_unit,
            position,
            travel_range_units,
        })
    }
}

impl Device for AxisController {
    fn name(&self) -> &'static str {
        "axis_controller"
    }

    fn connect(&self) -> Result<(), DeviceError> {
        AxisController::connect(self).map_err(DeviceError::from)
    }

    fn disconnect(&self) {
        self.disconnect_link();
    }

    fn is_alive(&self) -> bool {
        self.is_device_alive()
    }

    fn send_query(&self, message: &str, expected_lines: usize) -> Option<String> {
        let reply = self
            .link
            .send_query(message, true, expected_lines, self.settings.retries);
        if let Some(text) = reply.as_deref() {
            self.note_fault(text);
        }
        reply
    }

    fn identification(&self) -> Option<String> {
        self.identify()
    }
}
