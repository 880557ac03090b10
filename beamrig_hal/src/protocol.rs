//! Wire commands and reply parsing for the axis controller firmware.
//!
//! Everything here is pure: no I/O, no retries, no sleeping. The controller
//! decides what to do with a [`Reply`]; this module only says what it is.

use beamrig_common::consts::FIRMWARE_ID;
use std::fmt;
use thiserror::Error;

// ─── Commands ───────────────────────────────────────────────────────

/// A command understood by the controller firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ID?`: firmware identification, doubles as the keepalive ping.
    Identify,
    /// `H<axis>`: run the homing (reference) cycle.
    Home { axis: u8 },
    /// `P<axis>?`: read the current step position.
    GetPosition { axis: u8 },
    /// `P<axis><target>`: start a move to an absolute step coordinate.
    MoveTo { axis: u8, target: i64 },
    /// `LCr rLP50`: laser status read-back.
    LaserStatus,
    /// `LCe 1`
    LaserOn,
    /// `LCe 0`
    LaserOff,
    /// `LCr i`: five-line laser information block.
    LaserInfo,
    /// `LP50`: set laser output power.
    LaserPower,
    /// `TCr r`: cooler readings line.
    CoolerData,
    /// Operator-configured command text sent as-is.
    Raw(String),
}

impl Command {
    /// Number of reply lines the firmware sends for this command.
    pub fn expected_lines(&self) -> usize {
        match self {
            Command::LaserInfo => 5,
            _ => 1,
        }
    }

    /// Wire text without the trailing newline.
    pub fn wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Identify => f.write_str("ID?"),
            Command::Home { axis } => write!(f, "H{axis}"),
            Command::GetPosition { axis } => write!(f, "P{axis}?"),
            Command::MoveTo { axis, target } => write!(f, "P{axis}{target}"),
            Command::LaserStatus => f.write_str("LCr rLP50"),
            Command::LaserOn => f.write_str("LCe 1"),
            Command::LaserOff => f.write_str("LCe 0"),
            Command::LaserInfo => f.write_str("LCr i"),
            Command::LaserPower => f.write_str("LP50"),
            Command::CoolerData => f.write_str("TCr r"),
            Command::Raw(text) => f.write_str(text),
        }
    }
}

// ─── Faults ─────────────────────────────────────────────────────────

/// Meaning of an `Error_<n>` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// `Error_1`
    UnknownCommand,
    /// `Error_2`
    NoSuchAxis,
    /// Any other code.
    Other,
}

impl FaultKind {
    fn from_code(code: u32) -> Self {
        match code {
            1 => FaultKind::UnknownCommand,
            2 => FaultKind::NoSuchAxis,
            _ => FaultKind::Other,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            FaultKind::UnknownCommand => "Unknown command",
            FaultKind::NoSuchAxis => "Axis does not exist",
            FaultKind::Other => "Unknown error",
        }
    }
}

/// Whether a fault only got logged or also failed the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSeverity {
    /// Reported by the firmware, operation carried on.
    Warning,
    /// The explicit success check that followed it failed.
    Fatal,
}

/// An `Error_<n>` token seen in a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerFault {
    /// Numeric code after `Error_` (0 when absent or unparsable).
    pub code: u32,
    pub kind: FaultKind,
    pub severity: FaultSeverity,
}

impl ControllerFault {
    /// Same fault, raised to [`FaultSeverity::Fatal`].
    pub fn escalate(mut self) -> Self {
        self.severity = FaultSeverity::Fatal;
        self
    }
}

impl fmt::Display for ControllerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error_{} ({})", self.code, self.kind.describe())
    }
}

/// Scan `reply` for an `Error_<n>` token.
pub fn find_fault(reply: &str) -> Option<ControllerFault> {
    const MARKER: &str = "Error_";
    let start = reply.find(MARKER)? + MARKER.len();
    let digits: String = reply[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let code = digits.parse().unwrap_or(0);
    Some(ControllerFault {
        code,
        kind: FaultKind::from_code(code),
        severity: FaultSeverity::Warning,
    })
}

// ─── Replies ────────────────────────────────────────────────────────

/// Error type for reply interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Nothing came back at all.
    #[error("no reply from controller")]
    NoReply,

    /// A success token was required and something else arrived.
    #[error("command was not successful: {reply:?}")]
    NotSuccessful { reply: String },

    /// A position was required and the reply held no integer.
    #[error("failed to parse position from response: {reply:?}")]
    MalformedPosition { reply: String },
}

/// Classification of one reply, first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Exactly the firmware signature.
    Identification,
    /// `OK`
    Ok,
    /// `BUSY` (any case): operation still in progress.
    Busy,
    Fault(ControllerFault),
    Position(i64),
    Other(String),
}

impl Reply {
    pub fn parse(reply: &str) -> Self {
        let line = first_line(reply);
        if line == FIRMWARE_ID {
            Reply::Identification
        } else if line == "OK" {
            Reply::Ok
        } else if is_busy(line) {
            Reply::Busy
        } else if let Some(fault) = find_fault(reply) {
            Reply::Fault(fault)
        } else if let Ok(position) = parse_position(reply) {
            Reply::Position(position)
        } else {
            Reply::Other(reply.to_string())
        }
    }
}

/// First line of a reply, trimmed.
pub fn first_line(reply: &str) -> &str {
    reply.lines().next().unwrap_or("").trim()
}

pub fn is_busy(reply: &str) -> bool {
    first_line(reply).eq_ignore_ascii_case("BUSY")
}

/// `true` only for the exact firmware signature.
pub fn is_identification(reply: Option<&str>) -> bool {
    reply.map(str::trim) == Some(FIRMWARE_ID)
}

/// Require the first line to be exactly `OK`.
pub fn expect_ok(reply: Option<&str>) -> Result<(), ProtocolError> {
    match reply {
        None => Err(ProtocolError::NoReply),
        Some(text) if first_line(text) == "OK" => Ok(()),
        Some(text) => Err(ProtocolError::NotSuccessful {
            reply: text.to_string(),
        }),
    }
}

/// First signed integer substring of the reply.
pub fn parse_position(reply: &str) -> Result<i64, ProtocolError> {
    let malformed = || ProtocolError::MalformedPosition {
        reply: reply.to_string(),
    };

    let bytes = reply.as_bytes();
    let first_digit = bytes
        .iter()
        .position(u8::is_ascii_digit)
        .ok_or_else(malformed)?;
    let start = if first_digit > 0 && bytes[first_digit - 1] == b'-' {
        first_digit - 1
    } else {
        first_digit
    };
    let end = bytes[first_digit..]
        .iter()
        .position(|b| !b.is_ascii_digit())
        .map_or(bytes.len(), |offset| first_digit + offset);

    reply[start..end].parse().map_err(|_| malformed())
}
