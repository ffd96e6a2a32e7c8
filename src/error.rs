//! Error types for the R10 bridge.
//!
//! Framing and transient protocol errors ([`FrameError`]) are recovered
//! locally by the session workers: the offending frame is dropped and the
//! reader resumes at the next sentinel. Lifecycle errors ([`BridgeError`])
//! are surfaced to the caller of `setup_session` and to the error sink;
//! disconnects are routed to the reconnect loop instead of being fatal.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Errors raised while bringing up or operating a device session.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    /// No usable host controller.
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The launch monitor was not found after a discovery scan.
    #[error("device {address} not found after discovery scan")]
    DeviceNotFound { address: String },

    /// GATT connect failed or the device never reported `connected`.
    #[error("failed to connect to device: {reason}")]
    ConnectFailed {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The CCCD write on the protected notifier was rejected and in-band
    /// pairing did not rescue it. Usually means the host bond is missing or
    /// the protected notifier was not the first GATT operation this session.
    #[error(
        "device refused notification enable (insufficient authentication); \
         re-pair the device while its LED is solid blue and make sure \
         Secure Connections is disabled on the adapter"
    )]
    NotifyAuthRequired,

    /// No handshake reply within the deadline.
    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    /// No matching response after all retry attempts.
    #[error("no response from device after {attempts} attempts")]
    RequestTimeout { attempts: u32 },

    /// The peer dropped the link.
    #[error("device disconnected")]
    Disconnected,

    /// Framing-level failure (checksum, COBS, truncation).
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Underlying BlueZ / D-Bus failure.
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the reconnect loop should retry after this error.
    ///
    /// Lifecycle failures on an otherwise healthy host are retried;
    /// a missing adapter, a device absent from the discovery scan or an
    /// authentication refusal aborts startup instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            BridgeError::AdapterUnavailable(_)
                | BridgeError::DeviceNotFound { .. }
                | BridgeError::NotifyAuthRequired
        )
    }
}

/// Errors from the framing layer. Always recovered locally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// CRC16 verification failed.
    #[error("checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { expected: u16, computed: u16 },

    /// COBS decode failed or the frame structure is invalid.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// Reassembled frame shorter than the minimum `len ‖ payload ‖ crc`.
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
}
