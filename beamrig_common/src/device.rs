//! Device capability trait and error types.
//!
//! This module defines:
//! - `Device` trait - Interface every supervised device kind implements
//! - `DeviceError` enum - Error types for device construction and I/O
//! - `DeviceFactory` type alias - Constructor used by the supervisor

use thiserror::Error;

/// Error types for device operations.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// The socket could not be opened.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The device answered, but not with the expected identification.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// A command/response exchange failed.
    #[error("Device communication error: {0}")]
    CommunicationError(String),
}

/// Factory closure producing a freshly connected device instance.
///
/// The supervisor calls this under the slot's construction lock; a returned error
/// leaves the slot empty until the next reconnect interval.
pub type DeviceFactory<D> = Box<dyn Fn() -> Result<D, DeviceError> + Send + Sync>;

/// Capability interface of a supervised device.
///
/// The supervisor only needs connect/disconnect/liveness; consumers that know
/// the concrete type use its richer API.
///
/// # Lifecycle
///
/// 1. constructed by a [`DeviceFactory`] (which is expected to `connect()`)
/// 2. `is_alive()` polled by the supervisor on its health-check interval
/// 3. `disconnect()` called once when the instance is torn down
pub trait Device: Send + Sync + 'static {
    /// Returns the device's human readable name (e.g., "axis controller").
    fn name(&self) -> &'static str;

    /// Open the transport and perform the identification handshake.
    fn connect(&self) -> Result<(), DeviceError>;

    /// Close the transport. Idempotent.
    fn disconnect(&self);

    /// Throttled self-check; may emit a keepalive ping.
    fn is_alive(&self) -> bool;

    /// Raw query passthrough. `None` means no usable reply.
    fn send_query(&self, message: &str, expected_lines: usize) -> Option<String>;

    /// Identification string, if the device currently reports the expected one.
    fn identification(&self) -> Option<String>;
}
