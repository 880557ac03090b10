//! Protocol and timing constants.
//!
//! Defaults here back the `serde(default)` helpers in [`crate::config`].

/// Firmware signature returned by the axis controller to `ID?`.
pub const FIRMWARE_ID: &str = "Controller6axisMkvd_V1";

/// Line-noise byte the controller occasionally emits; stripped from replies.
pub const SENTINEL_BYTE: u8 = 0xFF;

/// Reply line delimiter.
pub const LINE_DELIMITER: u8 = b'\n';

/// Position value reported by an axis that has not been homed since power-on.
pub const NOT_REFERENCED: i64 = -1;

/// Number of independently addressed axes on the controller.
pub const AXIS_COUNT: u8 = 6;

/// Default TCP port of the axis controller.
pub const DEFAULT_PORT: u16 = 5000;

/// Canonical service name (used for logging).
pub const SERVICE_NAME: &str = "beamrig";

// ─── Transport ──────────────────────────────────────────────────────

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 200;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 200;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_PACING_MS: u64 = 100;
pub const DEFAULT_RETRIES: u32 = 3;

// ─── Axis controller ────────────────────────────────────────────────

pub const DEFAULT_HANDSHAKE_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_BUSY_POLL_MS: u64 = 50;
pub const DEFAULT_POSITION_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_HOME_POLL_MS: u64 = 200;
pub const DEFAULT_HOME_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POSITION_POLL_MS: u64 = 100;
pub const DEFAULT_STALL_REPEATS: u32 = 20;
pub const DEFAULT_MOVE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_HOME_SETTLE_MS: u64 = 500;
pub const DEFAULT_LIVENESS_WINDOW_MS: u64 = 4_500;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_PING_QUIET_MS: u64 = 1_000;
/// Coordinate far beyond physical travel, used to run into the far limit switch.
pub const DEFAULT_CALIBRATION_TARGET: i64 = 100_000_000_000;
pub const DEFAULT_CALIBRATION_POLL_MS: u64 = 100;
pub const DEFAULT_CALIBRATION_SETTLE_MARGIN_MS: u64 = 30_000;

/// Back-off applied below the rounded-down limit position after calibration.
pub const LIMIT_SWITCH_BACKOFF: i64 = 500;

// ─── Supervisor ─────────────────────────────────────────────────────

pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 500;
pub const DEFAULT_SUPERVISOR_TICK_MS: u64 = 100;
pub const DEFAULT_HOST_CHECK_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_WATCHDOG_TICK_MS: u64 = 100;
