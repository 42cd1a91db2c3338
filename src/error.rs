//! Gateway error taxonomy.
//!
//! Timeout and Mismatch are retried inside the correlator up to the
//! configured attempt count before surfacing. Malformed records never appear
//! here — the record parsers return `Option` and the fetchers skip `None`.

use thiserror::Error;

/// Failures surfaced by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// An operation required an active link and there is none.
    #[error("no BLE device connected")]
    TransportUnavailable,

    /// The address could not be resolved to a connectable device.
    #[error("device {0} not found — scan and retry")]
    DeviceNotFound(String),

    /// The connected device lacks the command/notify characteristics.
    #[error("UART command/notify characteristics not found on device")]
    CapabilityMissing,

    /// No matching notification arrived before the deadline, all attempts used.
    #[error("no response to '{command}' after {attempts} attempts")]
    Timeout { command: String, attempts: u32 },

    /// A response arrived on the final attempt but matched no expected prefix.
    #[error("unexpected response '{response}' to '{command}'")]
    Mismatch { command: String, response: String },

    /// Anything the transport layer reports that has no finer classification.
    #[error("transport: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Whether the correlator may retry this failure on a non-final attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Mismatch { .. })
    }
}
