//! Bounded sleep-and-retry helper shared by every "wait until" loop.
//!
//! Homing, `BUSY` handling, convergence and the calibration limit-switch
//! wait all reduce to: try, look at the result, sleep, repeat until done,
//! timed out, or stopped. Stop requests are observed only at poll boundaries.

use beamrig_common::clock::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    Done(T),
    /// Not there yet; sleep and try again.
    Pending,
}

/// Marker error raised when a stop request is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Monotonic stop counter. Raising it aborts every loop whose token was
/// taken before the raise.
#[derive(Debug, Default)]
pub struct StopSignal {
    generation: AtomicU64,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort every loop currently holding a token.
    pub fn raise(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Snapshot for one top-level operation.
    pub fn token(&self) -> StopToken<'_> {
        StopToken {
            signal: self,
            generation: self.generation.load(Ordering::SeqCst),
        }
    }
}

/// A [`StopSignal`] snapshot carried through one operation and its nested loops.
#[derive(Debug, Clone, Copy)]
pub struct StopToken<'a> {
    signal: &'a StopSignal,
    generation: u64,
}

impl StopToken<'_> {
    pub fn is_stopped(&self) -> bool {
        self.signal.generation.load(Ordering::SeqCst) != self.generation
    }

    /// `Err(Interrupted)` once a stop has been raised.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_stopped() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Timing of one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until done or stopped.
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub fn bounded(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout: Some(timeout),
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }
}

/// Run `attempt` until it returns [`Step::Done`], an error, the stop token
/// fires, or `policy.timeout` has elapsed after a pending attempt.
///
/// `on_timeout` receives the time waited and builds the timeout error.
pub fn poll<T, E, A, F>(
    clock: &dyn Clock,
    stop: StopToken<'_>,
    policy: PollPolicy,
    mut attempt: A,
    on_timeout: F,
) -> Result<T, E>
where
    E: From<Interrupted>,
    A: FnMut() -> Result<Step<T>, E>,
    F: FnOnce(Duration) -> E,
{
    let started = clock.now();
    loop {
        stop.check()?;
        if let Step::Done(value) = attempt()? {
            return Ok(value);
        }

        let waited = clock.since(started);
        if policy.timeout.is_some_and(|limit| waited >= limit) {
            return Err(on_timeout(waited));
        }
        clock.sleep(policy.interval);
    }
}
